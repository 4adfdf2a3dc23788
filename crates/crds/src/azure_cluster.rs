//! AzureCluster CRD
//!
//! Infrastructure for a self-managed control plane: resource group, network,
//! load balancers and bastion.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cluster_api::{ApiEndpoint, FailureDomains};
use crate::conditions::{Condition, Conditioned};
use crate::futures::{Future, LongRunningOperations};
use crate::network::{BastionSpec, ExtendedLocationSpec, NetworkSpec};
use crate::references::IdentityReference;
use crate::tags::Tags;

/// Finalizer placed on AzureCluster objects
pub const AZURE_CLUSTER_FINALIZER: &str = "azurecluster.infrastructure.cluster.x-k8s.io";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureCluster",
    namespaced,
    status = "AzureClusterStatus",
    shortname = "azc"
)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterSpec {
    /// Resource group for every cluster resource
    #[serde(default)]
    pub resource_group: String,

    /// Azure subscription (falls back to AZURE_SUBSCRIPTION_ID)
    #[serde(default, rename = "subscriptionID")]
    pub subscription_id: String,

    /// Azure region
    pub location: String,

    /// Edge zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_location: Option<ExtendedLocationSpec>,

    /// Network declaration
    #[serde(default)]
    pub network_spec: NetworkSpec,

    /// Identity used to authenticate against Azure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_ref: Option<IdentityReference>,

    /// Bastion host
    #[serde(default)]
    pub bastion_spec: BastionSpec,

    /// Tags added to every Azure resource the cluster creates
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub additional_tags: Tags,

    /// Cloud name (e.g. "AzurePublicCloud"); empty means public cloud
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_environment: String,

    /// API server endpoint, filled once the load balancer exists
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// User overrides for discovered failure domains
    #[serde(default, skip_serializing_if = "FailureDomains::is_empty")]
    pub failure_domains: FailureDomains,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterStatus {
    /// Infrastructure is ready for machines
    #[serde(default)]
    pub ready: bool,

    /// Failure domains discovered for the location
    #[serde(default, skip_serializing_if = "FailureDomains::is_empty")]
    pub failure_domains: FailureDomains,

    /// Observations on the cluster infrastructure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Asynchronous Azure operations in flight
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub long_running_operation_states: Vec<Future>,
}

impl Conditioned for AzureCluster {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl LongRunningOperations for AzureCluster {
    fn futures(&self) -> &[Future] {
        self.status
            .as_ref()
            .map(|s| s.long_running_operation_states.as_slice())
            .unwrap_or(&[])
    }

    fn futures_mut(&mut self) -> &mut Vec<Future> {
        &mut self.status.get_or_insert_with(Default::default).long_running_operation_states
    }
}
