//! Scope for a scale-set backed AzureMachinePool
//!
//! Besides projecting the scale set spec, the scope keeps one
//! AzureMachinePoolMachine record per observed scale set instance and
//! reaps records through the rolling update strategy when the pool runs
//! more instances than desired.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use crds::azure_machine_pool::ProvisioningState;
use crds::cluster_api::CLUSTER_NAME_LABEL;
use crds::conditions::{
    self, Condition, ConditionSeverity, READY, SCALE_SET_DESIRED_REPLICAS, SCALE_SET_MODEL_UPDATED,
    SCALE_SET_RUNNING, VM_RUNNING, reasons,
};
use crds::futures::{Future, FutureType};
use crds::tags::Tags;
use crds::{
    AZURE_MACHINE_POOL_MACHINE_FINALIZER, AzureMachinePool, AzureMachinePoolMachine, AzureMachinePoolMachineSpec,
    MACHINE_POOL_NAME_LABEL, MachinePool,
};
use kube::Resource;
use kube::api::ObjectMeta;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::conditions::{set_summary, update_delete_status, update_put_status};
use crate::error::{OperationError, ScopeError};
use crate::lro;
use crate::names;
use crate::patch::PatchHelper;
use crate::rolling_update::RollingUpdateStrategy;
use crate::scope::ClusterScoper;
use crate::scope_trait::{ObjectKind, ScopeClient};
use crate::specs::{SCALE_SETS_SERVICE_NAME, ScaleSetSpec};

/// Conditions summarised into `Ready` on close
const OWNED_CONDITIONS: &[&str] = &[READY, SCALE_SET_RUNNING, SCALE_SET_MODEL_UPDATED, SCALE_SET_DESIRED_REPLICAS];

/// One VM of the scale set as Azure reports it
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleSetInstance {
    /// Azure resource ID
    pub id: String,
    pub instance_id: String,
    /// Computer name
    pub name: String,
    pub provider_id: String,
    pub state: ProvisioningState,
    pub latest_model_applied: bool,
    pub zone: Option<String>,
}

/// Scale set as Azure reports it
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleSetState {
    pub id: String,
    pub name: String,
    pub capacity: i64,
    pub state: ProvisioningState,
    pub instances: Vec<ScaleSetInstance>,
}

impl ScaleSetState {
    /// Instances keyed by lowercased provider ID
    pub fn instances_by_provider_id(&self) -> BTreeMap<String, &ScaleSetInstance> {
        self.instances
            .iter()
            .map(|i| (i.provider_id.to_lowercase(), i))
            .collect()
    }
}

/// Inputs of [`MachinePoolScope::new`]
pub struct MachinePoolScopeParams {
    pub client: Arc<dyn ScopeClient>,
    pub cluster: Arc<dyn ClusterScoper>,
    pub machine_pool: MachinePool,
    pub azure_machine_pool: AzureMachinePool,
}

/// Per-pass scope over an AzureMachinePool
pub struct MachinePoolScope {
    client: Arc<dyn ScopeClient>,
    cluster: Arc<dyn ClusterScoper>,
    patch_helper: PatchHelper,
    scale_set_state: Option<ScaleSetState>,
    pub machine_pool: MachinePool,
    pub azure_machine_pool: AzureMachinePool,
}

fn machine_provider_id(machine: &AzureMachinePoolMachine) -> String {
    machine.spec.provider_id.to_lowercase()
}

fn machine_name(machine: &AzureMachinePoolMachine) -> &str {
    machine.metadata.name.as_deref().unwrap_or_default()
}

/// Records keyed by lowercased provider ID, plus every record whose
/// provider ID was already taken by an earlier one
fn index_by_provider_id(
    machines: &[AzureMachinePoolMachine],
) -> (BTreeMap<String, &AzureMachinePoolMachine>, Vec<&AzureMachinePoolMachine>) {
    let mut index = BTreeMap::new();
    let mut duplicates = Vec::new();
    for machine in machines {
        match index.entry(machine_provider_id(machine)) {
            Entry::Vacant(slot) => {
                slot.insert(machine);
            }
            Entry::Occupied(_) => duplicates.push(machine),
        }
    }
    (index, duplicates)
}

impl MachinePoolScope {
    pub fn new(params: MachinePoolScopeParams) -> Result<Self, ScopeError> {
        let patch_helper = PatchHelper::new(ObjectKind::AzureMachinePool, &params.azure_machine_pool)?;
        Ok(Self {
            client: params.client,
            cluster: params.cluster,
            patch_helper,
            scale_set_state: None,
            machine_pool: params.machine_pool,
            azure_machine_pool: params.azure_machine_pool,
        })
    }

    pub fn name(&self) -> &str {
        self.azure_machine_pool.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.azure_machine_pool.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn cluster(&self) -> &dyn ClusterScoper {
        self.cluster.as_ref()
    }

    /// Replicas requested on the MachinePool; unset means zero
    pub fn desired_replicas(&self) -> i32 {
        self.machine_pool.spec.replicas.unwrap_or(0)
    }

    pub fn rolling_update_strategy(&self) -> RollingUpdateStrategy {
        self.azure_machine_pool
            .spec
            .strategy
            .rolling_update
            .as_ref()
            .map(RollingUpdateStrategy::from)
            .unwrap_or_default()
    }

    /// Extra instances a model rollout may add on top of the desired count
    pub fn max_surge(&self) -> Result<i32, ScopeError> {
        self.rolling_update_strategy().surge(self.desired_replicas())
    }

    /// Cluster tags overlaid with the pool's own
    pub fn additional_tags(&self) -> Tags {
        let mut tags = self.cluster.additional_tags();
        tags.extend(self.azure_machine_pool.spec.additional_tags.clone());
        tags
    }

    pub fn scale_set_spec(&self) -> ScaleSetSpec {
        let spec = &self.azure_machine_pool.spec;
        let template = &spec.template;
        let mut failure_domains = self.machine_pool.spec.failure_domains.clone();
        failure_domains.sort();

        ScaleSetSpec {
            name: names::scale_set_name(self.name(), &template.os_disk.os_type),
            resource_group: self.cluster.resource_group().to_string(),
            location: spec.location.clone(),
            cluster_name: self.cluster.cluster_name().to_string(),
            size: template.vm_size.clone(),
            capacity: i64::from(self.desired_replicas()),
            ssh_key_data: template.ssh_public_key.clone(),
            os_disk: template.os_disk.clone(),
            data_disks: template.data_disks.clone(),
            subnet_name: template
                .subnet_name
                .clone()
                .unwrap_or_else(|| self.cluster.node_subnet_name().to_string()),
            vnet_name: self.cluster.vnet_name().to_string(),
            vnet_resource_group: self.cluster.vnet_resource_group().to_string(),
            accelerated_networking: template.accelerated_networking,
            terminate_notification_timeout: template.terminate_notification_timeout,
            spot_vm_options: template.spot_vm_options.clone(),
            failure_domains,
            orchestration_mode: spec.orchestration_mode,
            additional_tags: self.additional_tags(),
        }
    }

    /// Record what Azure reports; applied to the pool and its machines on close
    pub fn set_vmss_state(&mut self, state: ScaleSetState) {
        self.scale_set_state = Some(state);
    }

    pub fn vmss_state(&self) -> Option<&ScaleSetState> {
        self.scale_set_state.as_ref()
    }

    fn machine_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (CLUSTER_NAME_LABEL.to_string(), self.cluster.cluster_name().to_string()),
            (MACHINE_POOL_NAME_LABEL.to_string(), self.name().to_string()),
        ])
    }

    async fn list_machines(&self) -> Result<Vec<AzureMachinePoolMachine>, ScopeError> {
        self.client
            .list_machine_pool_machines(self.namespace(), &self.machine_labels())
            .await
    }

    async fn create_machine(&self, instance: &ScaleSetInstance) -> Result<(), ScopeError> {
        let owner = self
            .azure_machine_pool
            .controller_owner_ref(&())
            .ok_or_else(|| ScopeError::InvalidInput(format!("AzureMachinePool {} has no uid", self.name())))?;
        let name = format!("{}-{}", self.name(), instance.instance_id).to_lowercase();

        let machine = AzureMachinePoolMachine {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace().to_string()),
                labels: Some(self.machine_labels()),
                owner_references: Some(vec![owner]),
                finalizers: Some(vec![AZURE_MACHINE_POOL_MACHINE_FINALIZER.to_string()]),
                ..Default::default()
            },
            spec: AzureMachinePoolMachineSpec {
                provider_id: instance.provider_id.clone(),
                instance_id: instance.instance_id.clone(),
            },
            status: None,
        };
        self.client.create_machine_pool_machine(&machine).await?;

        // Status is a subresource, so the initial condition goes in its own patch
        let creating = Condition::false_condition(VM_RUNNING, reasons::CREATING, ConditionSeverity::Info, "");
        let status = json!({ "status": { "conditions": [creating] } });
        self.client
            .patch_object_status(ObjectKind::AzureMachinePoolMachine, self.namespace(), &name, &status)
            .await?;

        info!(pool = %self.name(), machine = %name, provider_id = %instance.provider_id, "created pool machine");
        Ok(())
    }

    /// An already deleted record counts as success
    async fn delete_machine(&self, machine: &AzureMachinePoolMachine) -> Result<(), ScopeError> {
        self.client
            .delete_machine_pool_machine(self.namespace(), machine_name(machine))
            .await
    }

    /// Bind one AzureMachinePoolMachine to each observed instance.
    ///
    /// Missing records are created and orphaned ones deleted. When nothing
    /// was orphaned and no scale set operation is in flight, surplus machines
    /// chosen by the rolling update strategy are deleted too. Replicas and
    /// the provider ID list are refreshed from the resulting records.
    pub async fn apply_azure_machine_pool_machines(&mut self) -> Result<(), ScopeError> {
        let Some(state) = &self.scale_set_state else {
            return Ok(());
        };

        let mut existing = self.list_machines().await?;
        existing.sort_by(|a, b| machine_name(a).cmp(machine_name(b)));
        let (existing_by_provider_id, duplicates) = index_by_provider_id(&existing);
        let observed = state.instances_by_provider_id();

        let mut deleted = false;
        for machine in &duplicates {
            warn!(
                pool = %self.name(),
                machine = %machine_name(machine),
                provider_id = %machine.spec.provider_id,
                "deleting duplicate pool machine"
            );
            self.delete_machine(machine).await?;
            deleted = true;
        }

        for (provider_id, instance) in &observed {
            if !existing_by_provider_id.contains_key(provider_id) {
                self.create_machine(instance).await?;
            }
        }

        for (provider_id, machine) in &existing_by_provider_id {
            if !observed.contains_key(provider_id) {
                info!(pool = %self.name(), machine = %machine_name(machine), "deleting orphaned pool machine");
                self.delete_machine(machine).await?;
                deleted = true;
            }
        }

        if !deleted && !lro::has_service_future(&self.azure_machine_pool, SCALE_SETS_SERVICE_NAME) {
            let to_delete = self
                .rolling_update_strategy()
                .select_machines_to_delete(self.desired_replicas(), &existing)?;
            for machine in &to_delete {
                info!(pool = %self.name(), machine = %machine_name(machine), "deleting pool machine for rolling update");
                self.delete_machine(machine).await?;
            }
        } else if !deleted {
            debug!(pool = %self.name(), "scale set operation in flight, skipping rolling update");
        }

        self.update_replicas_and_provider_ids().await
    }

    async fn update_replicas_and_provider_ids(&mut self) -> Result<(), ScopeError> {
        let machines = self.list_machines().await?;
        let ready = machines
            .iter()
            .filter(|m| m.status.as_ref().is_some_and(|s| s.ready))
            .count();
        let mut provider_ids: Vec<String> = machines.iter().map(|m| m.spec.provider_id.clone()).collect();
        provider_ids.sort();

        self.azure_machine_pool.status.get_or_insert_with(Default::default).replicas =
            i32::try_from(ready).map_err(|_| ScopeError::InvalidInput("too many pool machines".to_string()))?;
        self.azure_machine_pool.spec.provider_id_list = provider_ids;
        Ok(())
    }

    /// Map the scale set provisioning state onto the pool conditions.
    ///
    /// Compares the ready replicas in status with the desired count, so run
    /// it after the replicas were refreshed.
    pub fn set_provisioning_state_and_conditions(&mut self, state: ProvisioningState) {
        let desired = self.desired_replicas();
        let replicas = self.azure_machine_pool.status.as_ref().map_or(0, |s| s.replicas);
        self.azure_machine_pool
            .status
            .get_or_insert_with(Default::default)
            .provisioning_state = Some(state.clone());

        let pool = &mut self.azure_machine_pool;
        let info = ConditionSeverity::Info;
        let ready = match state {
            ProvisioningState::Succeeded if desired == replicas => {
                conditions::mark_true(pool, SCALE_SET_RUNNING);
                conditions::mark_true(pool, SCALE_SET_MODEL_UPDATED);
                conditions::mark_true(pool, SCALE_SET_DESIRED_REPLICAS);
                true
            }
            ProvisioningState::Succeeded => {
                let reason = if desired > replicas { reasons::SCALE_UP } else { reasons::SCALE_DOWN };
                conditions::mark_false(pool, SCALE_SET_DESIRED_REPLICAS, reason, info, "");
                if let Some(status) = pool.status.as_mut() {
                    status.provisioning_state = Some(ProvisioningState::Updating);
                }
                false
            }
            ProvisioningState::Updating => {
                conditions::mark_false(pool, SCALE_SET_MODEL_UPDATED, reasons::MODEL_OUT_OF_DATE, info, "");
                false
            }
            ProvisioningState::Creating => {
                conditions::mark_false(pool, SCALE_SET_RUNNING, reasons::CREATING, info, "");
                false
            }
            ProvisioningState::Deleting => {
                conditions::mark_false(pool, SCALE_SET_RUNNING, reasons::DELETING, info, "");
                false
            }
            other => {
                conditions::mark_false(pool, SCALE_SET_RUNNING, other.as_str(), info, "");
                false
            }
        };
        self.set_ready(ready);
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.azure_machine_pool.status.get_or_insert_with(Default::default).ready = ready;
    }

    /// Terminal failure the pool cannot recover from on its own
    pub fn set_failure(&mut self, reason: &str, message: impl Into<String>) {
        let status = self.azure_machine_pool.status.get_or_insert_with(Default::default);
        status.failure_reason = Some(reason.to_string());
        status.failure_message = Some(message.into());
    }

    pub fn set_long_running_operation_state(&mut self, future: Future) {
        lro::set(&mut self.azure_machine_pool, future);
    }

    pub fn get_long_running_operation_state(&self, name: &str, service: &str, type_: FutureType) -> Option<Future> {
        lro::get(&self.azure_machine_pool, name, service, type_).cloned()
    }

    pub fn delete_long_running_operation_state(&mut self, name: &str, service: &str, type_: FutureType) {
        lro::delete(&mut self.azure_machine_pool, name, service, type_);
    }

    pub fn update_put_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_put_status(&mut self.azure_machine_pool, condition, service, err);
    }

    pub fn update_delete_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_delete_status(&mut self.azure_machine_pool, condition, service, err);
    }

    /// Bind machines to the observed instances, update conditions and patch
    pub async fn close(mut self) -> Result<(), ScopeError> {
        if let Some(state) = self.scale_set_state.as_ref().map(|s| s.state.clone()) {
            self.apply_azure_machine_pool_machines().await?;
            self.set_provisioning_state_and_conditions(state);
        } else {
            debug!(pool = %self.name(), "no scale set state observed this pass");
        }
        set_summary(&mut self.azure_machine_pool, OWNED_CONDITIONS);
        self.patch_helper.patch(self.client.as_ref(), &self.azure_machine_pool).await
    }
}
