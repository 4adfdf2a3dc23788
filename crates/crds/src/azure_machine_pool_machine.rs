//! AzureMachinePoolMachine CRD
//!
//! One record per scale set instance, owned by its AzureMachinePool.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::azure_machine_pool::ProvisioningState;
use crate::conditions::{Condition, Conditioned};
use crate::futures::{Future, LongRunningOperations};
use crate::references::ObjectReference;

/// Finalizer placed on every instance record
pub const AZURE_MACHINE_POOL_MACHINE_FINALIZER: &str =
    "azuremachinepoolmachine.infrastructure.cluster.x-k8s.io";

/// Label linking an instance record to its pool
pub const MACHINE_POOL_NAME_LABEL: &str = "azuremachinepool.infrastructure.cluster.x-k8s.io/machine-pool";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureMachinePoolMachine",
    namespaced,
    status = "AzureMachinePoolMachineStatus",
    shortname = "ampm"
)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolMachineSpec {
    /// Provider ID of the instance (e.g. "azure:///subscriptions/.../virtualMachines/0")
    #[serde(rename = "providerID")]
    pub provider_id: String,

    /// Scale set instance ID
    #[serde(default, rename = "instanceID")]
    pub instance_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolMachineStatus {
    /// Workload cluster node backing the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<ObjectReference>,

    /// Kubelet version reported by the node
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Provisioning state of the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<ProvisioningState>,

    /// Azure instance name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_name: String,

    /// Instance runs the latest scale set model
    #[serde(default)]
    pub latest_model_applied: bool,

    /// Node is ready
    #[serde(default)]
    pub ready: bool,

    /// Terminal failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Observations on the instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Asynchronous Azure operations in flight
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub long_running_operation_states: Vec<Future>,
}

impl Conditioned for AzureMachinePoolMachine {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl LongRunningOperations for AzureMachinePoolMachine {
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
