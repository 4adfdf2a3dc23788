//! AzureMachinePool CRD
//!
//! A virtual machine scale set backing a Cluster API MachinePool, and the
//! rolling-update strategy used to replace its instances.

use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, Conditioned};
use crate::futures::{Future, LongRunningOperations};
use crate::tags::Tags;

/// Finalizer placed on AzureMachinePool objects
pub const AZURE_MACHINE_POOL_FINALIZER: &str = "azuremachinepool.infrastructure.cluster.x-k8s.io";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureMachinePool",
    namespaced,
    status = "AzureMachinePoolStatus",
    shortname = "amp"
)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolSpec {
    /// Azure region
    pub location: String,

    /// Template for every instance of the scale set
    pub template: AzureMachinePoolMachineTemplate,

    /// Tags added to the scale set
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub additional_tags: Tags,

    /// Provider IDs of the instances
    #[serde(default, rename = "providerIDList", skip_serializing_if = "Vec::is_empty")]
    pub provider_id_list: Vec<String>,

    /// Instance replacement strategy
    #[serde(default)]
    pub strategy: AzureMachinePoolDeploymentStrategy,

    /// Time allowed for draining a node before its instance is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_drain_timeout_seconds: Option<i64>,

    /// Scale set orchestration mode
    #[serde(default)]
    pub orchestration_mode: OrchestrationMode,
}

/// Instance template
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolMachineTemplate {
    /// VM size (e.g. "Standard_D2s_v3")
    pub vm_size: String,

    /// OS disk
    #[serde(default)]
    pub os_disk: OsDisk,

    /// Additional data disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_disks: Vec<DataDisk>,

    /// Base64 encoded SSH public key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_public_key: String,

    /// Subnet the instances join (defaults to the first node subnet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_name: Option<String>,

    /// Accelerated networking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerated_networking: Option<bool>,

    /// Spot instance options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_vm_options: Option<SpotVmOptions>,

    /// Scheduled events termination notice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_notification_timeout: Option<i32>,
}

/// OS disk of an instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    /// "Linux" or "Windows"
    #[serde(default)]
    pub os_type: String,

    /// Disk size
    #[serde(default, rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<i32>,

    /// Storage account type (e.g. "Premium_LRS")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account_type: Option<String>,

    /// Caching mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching_type: Option<String>,
}

/// Data disk of an instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataDisk {
    /// Suffix appended to the instance name
    pub name_suffix: String,

    /// Disk size
    #[serde(rename = "diskSizeGB")]
    pub disk_size_gb: i32,

    /// Logical unit number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lun: Option<i32>,
}

/// Spot instance options
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpotVmOptions {
    /// Maximum hourly price; unset pays up to the on-demand price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
}

/// Scale set orchestration mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum OrchestrationMode {
    /// Uniform instances from one model
    #[default]
    Uniform,
    /// Flexible orchestration
    Flexible,
}

/// Integer or percentage (e.g. `1` or `"25%"`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum IntOrString {
    /// Absolute value
    Int(i32),
    /// Absolute value or percentage as a string
    String(String),
}

impl fmt::Display for IntOrString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntOrString::Int(i) => write!(f, "{i}"),
            IntOrString::String(s) => f.write_str(s),
        }
    }
}

fn int_or_string_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "x-kubernetes-int-or-string": true
    })
}

/// How instances are replaced when the model changes
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolDeploymentStrategy {
    /// Strategy type
    #[serde(default, rename = "type")]
    pub type_: DeploymentStrategyType,

    /// Rolling update parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<MachineRollingUpdateDeployment>,
}

/// Strategy type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum DeploymentStrategyType {
    /// Replace out-of-date instances gradually
    #[default]
    RollingUpdate,
}

/// Rolling update parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineRollingUpdateDeployment {
    /// Instances that may be unavailable during the update (default 0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "int_or_string_schema")]
    pub max_unavailable: Option<IntOrString>,

    /// Instances that may be created above the desired count (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "int_or_string_schema")]
    pub max_surge: Option<IntOrString>,

    /// Order in which surplus instances are removed
    #[serde(default)]
    pub delete_policy: DeletePolicy,
}

/// Order in which surplus instances are removed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Random order
    Random,
    /// Oldest first
    #[default]
    Oldest,
    /// Newest first
    Newest,
}

/// Azure provisioning state of a scale set or instance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ProvisioningState {
    Succeeded,
    Updating,
    Creating,
    Deleting,
    Deleted,
    Failed,
    Canceled,
    Migrating,
}

impl ProvisioningState {
    /// Wire value of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningState::Succeeded => "Succeeded",
            ProvisioningState::Updating => "Updating",
            ProvisioningState::Creating => "Creating",
            ProvisioningState::Deleting => "Deleting",
            ProvisioningState::Deleted => "Deleted",
            ProvisioningState::Failed => "Failed",
            ProvisioningState::Canceled => "Canceled",
            ProvisioningState::Migrating => "Migrating",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolStatus {
    /// Scale set is running the desired model and count
    #[serde(default)]
    pub ready: bool,

    /// Instances whose AzureMachinePoolMachine is ready
    #[serde(default)]
    pub replicas: i32,

    /// Provisioning state of the scale set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<ProvisioningState>,

    /// Terminal failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Observations on the scale set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Asynchronous Azure operations in flight
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub long_running_operation_states: Vec<Future>,
}

impl Conditioned for AzureMachinePool {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl LongRunningOperations for AzureMachinePool {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_or_string_accepts_both_forms() {
        let rolling: MachineRollingUpdateDeployment = serde_json::from_value(serde_json::json!({
            "maxSurge": "25%",
            "maxUnavailable": 1,
            "deletePolicy": "Newest"
        }))
        .unwrap();

        assert_eq!(rolling.max_surge, Some(IntOrString::String("25%".to_string())));
        assert_eq!(rolling.max_unavailable, Some(IntOrString::Int(1)));
        assert_eq!(rolling.delete_policy, DeletePolicy::Newest);
    }
}
