//! Scope for one AKS agent pool

use std::sync::Arc;

use crds::conditions::{self, AGENT_POOLS_READY, READY};
use crds::futures::{Future, FutureType};
use crds::{AzureManagedMachinePool, MachinePool};
use tracing::debug;

use crate::conditions::{set_summary, update_delete_status, update_put_status};
use crate::error::{OperationError, ScopeError};
use crate::lro;
use crate::names;
use crate::patch::PatchHelper;
use crate::scope::ClusterScoper;
use crate::scope_trait::{ObjectKind, ScopeClient};
use crate::specs::AgentPoolSpec;

/// Conditions summarised into `Ready` on close
const OWNED_CONDITIONS: &[&str] = &[READY, AGENT_POOLS_READY];

/// Agent pool projection shared with the control plane scope.
///
/// Replicas default to 1 and the OS disk size to 0 (Azure picks). The
/// subnet falls back to the control plane's default subnet.
pub fn agent_pool_spec(
    cluster: &dyn ClusterScoper,
    pool: &AzureManagedMachinePool,
    machine_pool: &MachinePool,
) -> AgentPoolSpec {
    let spec = &pool.spec;
    let name = spec
        .name
        .clone()
        .or_else(|| pool.metadata.name.clone())
        .unwrap_or_default();
    let subnet_name = spec.subnet_name.as_deref().unwrap_or(cluster.node_subnet_name());

    AgentPoolSpec {
        name,
        resource_group: cluster.resource_group().to_string(),
        cluster: cluster.cluster_name().to_string(),
        version: machine_pool
            .spec
            .template
            .spec
            .version
            .as_deref()
            .map(|v| v.trim_start_matches('v').to_string()),
        sku: spec.sku.clone(),
        replicas: machine_pool.spec.replicas.unwrap_or(1),
        os_disk_size_gb: spec.os_disk_size_gb.unwrap_or(0),
        vnet_subnet_id: names::subnet_id(
            cluster.subscription_id(),
            cluster.vnet_resource_group(),
            cluster.vnet_name(),
            subnet_name,
        ),
        mode: spec.mode.as_str().to_string(),
        max_count: spec.scaling.as_ref().and_then(|s| s.max_size),
        min_count: spec.scaling.as_ref().and_then(|s| s.min_size),
        enable_auto_scaling: spec.scaling.is_some(),
        node_labels: spec.node_labels.clone(),
        node_taints: spec
            .taints
            .iter()
            .map(|t| format!("{}={}:{}", t.key, t.value, t.effect))
            .collect(),
        availability_zones: spec.availability_zones.clone(),
        max_pods: spec.max_pods,
        os_disk_type: spec.os_disk_type.clone(),
        enable_ultra_ssd: spec.enable_ultra_ssd,
        os_type: spec.os_type.clone(),
        enable_node_public_ip: spec.enable_node_public_ip,
        enable_fips: spec.enable_fips,
        scale_set_priority: spec.scale_set_priority.clone(),
        additional_tags: spec.additional_tags.clone(),
    }
}

/// Inputs of [`ManagedMachinePoolScope::new`]
pub struct ManagedMachinePoolScopeParams {
    pub client: Arc<dyn ScopeClient>,
    /// Control plane the pool belongs to
    pub cluster: Arc<dyn ClusterScoper>,
    pub machine_pool: MachinePool,
    pub managed_machine_pool: AzureManagedMachinePool,
}

/// Per-pass scope over an AzureManagedMachinePool
pub struct ManagedMachinePoolScope {
    client: Arc<dyn ScopeClient>,
    cluster: Arc<dyn ClusterScoper>,
    patch_helper: PatchHelper,
    pub machine_pool: MachinePool,
    pub managed_machine_pool: AzureManagedMachinePool,
}

impl ManagedMachinePoolScope {
    pub fn new(params: ManagedMachinePoolScopeParams) -> Result<Self, ScopeError> {
        let patch_helper = PatchHelper::new(ObjectKind::AzureManagedMachinePool, &params.managed_machine_pool)?;
        Ok(Self {
            client: params.client,
            cluster: params.cluster,
            patch_helper,
            machine_pool: params.machine_pool,
            managed_machine_pool: params.managed_machine_pool,
        })
    }

    pub fn agent_pool_spec(&self) -> AgentPoolSpec {
        agent_pool_spec(self.cluster.as_ref(), &self.managed_machine_pool, &self.machine_pool)
    }

    /// Record the node provider IDs, sorted so repeated passes patch nothing
    pub fn set_agent_pool_provider_id_list(&mut self, mut provider_ids: Vec<String>) {
        provider_ids.sort();
        self.managed_machine_pool.spec.provider_id_list = provider_ids;
    }

    pub fn set_agent_pool_replicas(&mut self, replicas: i32) {
        self.managed_machine_pool.status.get_or_insert_with(Default::default).replicas = replicas;
    }

    pub fn set_agent_pool_ready(&mut self, ready: bool) {
        self.managed_machine_pool.status.get_or_insert_with(Default::default).ready = ready;
    }

    pub fn set_long_running_operation_state(&mut self, future: Future) {
        lro::set(&mut self.managed_machine_pool, future);
    }

    pub fn get_long_running_operation_state(&self, name: &str, service: &str, type_: FutureType) -> Option<Future> {
        lro::get(&self.managed_machine_pool, name, service, type_).cloned()
    }

    pub fn delete_long_running_operation_state(&mut self, name: &str, service: &str, type_: FutureType) {
        lro::delete(&mut self.managed_machine_pool, name, service, type_);
    }

    pub fn update_put_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_put_status(&mut self.managed_machine_pool, condition, service, err);
    }

    pub fn update_delete_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_delete_status(&mut self.managed_machine_pool, condition, service, err);
    }

    /// Summarise conditions and patch the AzureManagedMachinePool
    pub async fn close(mut self) -> Result<(), ScopeError> {
        set_summary(&mut self.managed_machine_pool, OWNED_CONDITIONS);
        debug!(
            pool = %self.managed_machine_pool.metadata.name.as_deref().unwrap_or_default(),
            ready = conditions::is_true(&self.managed_machine_pool, READY),
            "closing managed machine pool scope"
        );
        self.patch_helper
            .patch(self.client.as_ref(), &self.managed_machine_pool)
            .await
    }
}
