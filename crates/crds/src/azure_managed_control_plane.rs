//! AzureManagedControlPlane CRD
//!
//! A cluster whose control plane is operated by Azure (AKS). The controller
//! only declares the managed cluster and its agent pools.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cluster_api::ApiEndpoint;
use crate::conditions::{Condition, Conditioned};
use crate::futures::{Future, LongRunningOperations};
use crate::references::IdentityReference;
use crate::tags::Tags;

/// Finalizer placed on AzureManagedControlPlane objects
pub const AZURE_MANAGED_CONTROL_PLANE_FINALIZER: &str = "azuremanagedcontrolplane.infrastructure.cluster.x-k8s.io";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureManagedControlPlane",
    namespaced,
    status = "AzureManagedControlPlaneStatus",
    shortname = "amcp"
)]
#[serde(rename_all = "camelCase")]
pub struct AzureManagedControlPlaneSpec {
    /// Kubernetes version (e.g. "v1.30.2")
    pub version: String,

    /// Resource group of the managed cluster
    pub resource_group_name: String,

    /// Resource group Azure creates for node resources
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_resource_group_name: String,

    /// Virtual network the agent pools join
    #[serde(default)]
    pub virtual_network: ManagedControlPlaneVirtualNetwork,

    /// Azure subscription (falls back to AZURE_SUBSCRIPTION_ID)
    #[serde(default, rename = "subscriptionID")]
    pub subscription_id: String,

    /// Azure region
    pub location: String,

    /// API server endpoint, filled once the managed cluster exists
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// Tags added to every Azure resource
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub additional_tags: Tags,

    /// Network plugin ("azure" or "kubenet")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_plugin: Option<String>,

    /// Network policy ("azure" or "calico")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_policy: Option<String>,

    /// Outbound type ("loadBalancer", "userDefinedRouting", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_type: Option<String>,

    /// Base64 encoded SSH public key for the nodes
    pub ssh_public_key: String,

    /// Cluster DNS service IP, must lie inside the service CIDR
    #[serde(default, rename = "dnsServiceIP", skip_serializing_if = "Option::is_none")]
    pub dns_service_ip: Option<String>,

    /// Load balancer SKU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_sku: Option<String>,

    /// Identity used to authenticate against Azure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_ref: Option<IdentityReference>,

    /// Azure AD integration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad_profile: Option<AadProfile>,

    /// Cluster addons
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addon_profiles: Vec<AddonProfile>,

    /// Managed cluster SKU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<ManagedControlPlaneSku>,

    /// Outbound load balancer profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_profile: Option<LoadBalancerProfile>,

    /// API server access restrictions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_access_profile: Option<ApiServerAccessProfile>,

    /// Cloud name; empty means public cloud
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_environment: String,
}

/// Virtual network used by a managed cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedControlPlaneVirtualNetwork {
    /// VNet name
    #[serde(default)]
    pub name: String,

    /// VNet address space
    #[serde(default)]
    pub cidr_block: String,

    /// Default agent-pool subnet
    #[serde(default)]
    pub subnet: ManagedControlPlaneSubnet,

    /// Resource group of the VNet (defaults to the cluster resource group)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_group: String,
}

/// Agent-pool subnet
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedControlPlaneSubnet {
    /// Subnet name
    #[serde(default)]
    pub name: String,

    /// Subnet prefix
    #[serde(default)]
    pub cidr_block: String,
}

/// Azure AD integration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AadProfile {
    /// Azure AD managed integration
    #[serde(default)]
    pub managed: bool,

    /// Admin group object IDs
    #[serde(default, rename = "adminGroupObjectIDs")]
    pub admin_group_object_ids: Vec<String>,
}

/// A managed cluster addon
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddonProfile {
    /// Addon name
    pub name: String,

    /// Addon configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    /// Addon enabled
    #[serde(default)]
    pub enabled: bool,
}

/// Managed cluster SKU
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedControlPlaneSku {
    /// SKU tier ("Free" or "Paid")
    pub tier: String,
}

/// Outbound load balancer profile
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerProfile {
    /// Number of Azure managed outbound IPs
    #[serde(default, rename = "managedOutboundIPs", skip_serializing_if = "Option::is_none")]
    pub managed_outbound_ips: Option<i32>,

    /// Outbound IP prefix resource IDs
    #[serde(default, rename = "outboundIPPrefixes", skip_serializing_if = "Vec::is_empty")]
    pub outbound_ip_prefixes: Vec<String>,

    /// Outbound public IP resource IDs
    #[serde(default, rename = "outboundIPs", skip_serializing_if = "Vec::is_empty")]
    pub outbound_ips: Vec<String>,

    /// SNAT ports per VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_outbound_ports: Option<i32>,

    /// Outbound flow idle timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_in_minutes: Option<i32>,
}

/// API server access restrictions
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerAccessProfile {
    /// CIDRs allowed to reach the API server
    #[serde(default, rename = "authorizedIPRanges", skip_serializing_if = "Vec::is_empty")]
    pub authorized_ip_ranges: Vec<String>,

    /// Private cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_private_cluster: Option<bool>,

    /// Private DNS zone mode or resource ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_dns_zone: Option<String>,

    /// Keep a public FQDN on a private cluster
    #[serde(default, rename = "enablePrivateClusterPublicFQDN", skip_serializing_if = "Option::is_none")]
    pub enable_private_cluster_public_fqdn: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureManagedControlPlaneStatus {
    /// Managed cluster is provisioned
    #[serde(default)]
    pub ready: bool,

    /// Control plane initialized (kubeconfig available)
    #[serde(default)]
    pub initialized: bool,

    /// Observations on the managed cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Asynchronous Azure operations in flight
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub long_running_operation_states: Vec<Future>,
}

impl Conditioned for AzureManagedControlPlane {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl LongRunningOperations for AzureManagedControlPlane {
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
