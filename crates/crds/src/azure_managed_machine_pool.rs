//! AzureManagedMachinePool CRD
//!
//! One AKS agent pool. The pool belongs to a cluster through the
//! `cluster.x-k8s.io/cluster-name` label and to its MachinePool through an
//! owner reference.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, Conditioned};
use crate::futures::{Future, LongRunningOperations};
use crate::tags::Tags;

/// Finalizer placed on AzureManagedMachinePool objects
pub const AZURE_MANAGED_MACHINE_POOL_FINALIZER: &str = "azuremanagedmachinepool.infrastructure.cluster.x-k8s.io";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureManagedMachinePool",
    namespaced,
    status = "AzureManagedMachinePoolStatus",
    shortname = "ammp"
)]
#[serde(rename_all = "camelCase")]
pub struct AzureManagedMachinePoolSpec {
    /// Agent pool name in Azure (defaults to the object name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// System or User pool
    pub mode: NodePoolMode,

    /// VM size (e.g. "Standard_D2s_v3")
    pub sku: String,

    /// OS disk size
    #[serde(default, rename = "osDiskSizeGB", skip_serializing_if = "Option::is_none")]
    pub os_disk_size_gb: Option<i32>,

    /// Availability zones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_zones: Vec<String>,

    /// Kubernetes labels applied to the nodes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_labels: BTreeMap<String, String>,

    /// Kubernetes taints applied to the nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    /// Provider IDs of the pool nodes
    #[serde(default, rename = "providerIDList", skip_serializing_if = "Vec::is_empty")]
    pub provider_id_list: Vec<String>,

    /// Cluster autoscaler bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<ManagedMachinePoolScaling>,

    /// Maximum pods per node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pods: Option<i32>,

    /// OS disk type ("Managed" or "Ephemeral")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_disk_type: Option<String>,

    /// Ultra SSD support
    #[serde(default, rename = "enableUltraSSD", skip_serializing_if = "Option::is_none")]
    pub enable_ultra_ssd: Option<bool>,

    /// OS type ("Linux" or "Windows")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,

    /// Public IP per node
    #[serde(default, rename = "enableNodePublicIP", skip_serializing_if = "Option::is_none")]
    pub enable_node_public_ip: Option<bool>,

    /// FIPS enabled OS
    #[serde(default, rename = "enableFIPS", skip_serializing_if = "Option::is_none")]
    pub enable_fips: Option<bool>,

    /// Scale set priority ("Regular" or "Spot")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_set_priority: Option<String>,

    /// Tags added to the agent pool
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub additional_tags: Tags,

    /// Subnet in the control plane VNet (defaults to the control plane subnet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_name: Option<String>,
}

/// Agent pool mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum NodePoolMode {
    /// Hosts critical system pods; at least one is required
    System,
    /// Application workloads
    #[default]
    User,
}

impl NodePoolMode {
    /// Wire value of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            NodePoolMode::System => "System",
            NodePoolMode::User => "User",
        }
    }
}

/// Node taint
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    /// Effect ("NoSchedule", "PreferNoSchedule", "NoExecute")
    pub effect: String,

    /// Taint key
    pub key: String,

    /// Taint value
    #[serde(default)]
    pub value: String,
}

/// Cluster autoscaler bounds
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedMachinePoolScaling {
    /// Minimum node count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<i32>,

    /// Maximum node count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureManagedMachinePoolStatus {
    /// Agent pool is provisioned
    #[serde(default)]
    pub ready: bool,

    /// Observed node count
    #[serde(default)]
    pub replicas: i32,

    /// Observations on the agent pool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Asynchronous Azure operations in flight
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub long_running_operation_states: Vec<Future>,
}

impl Conditioned for AzureManagedMachinePool {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl LongRunningOperations for AzureManagedMachinePool {
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
