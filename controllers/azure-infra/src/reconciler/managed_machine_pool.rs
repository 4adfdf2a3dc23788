//! AzureManagedMachinePool reconciliation
//!
//! Keeps one AKS agent pool in line with its MachinePool and reports the
//! nodes of the scale set AKS runs behind it.

use std::sync::Arc;

use azure_scope::{
    InfraClusterScope, ManagedMachinePoolScope, ManagedMachinePoolScopeParams, ObjectKind, ResourceSpec,
    ResourceSpecGetter, ServiceSpecs,
};
use crds::cluster_api::{CLUSTER_API_GROUP, CLUSTER_NAME_LABEL};
use crds::conditions::AGENT_POOLS_READY;
use crds::{AZURE_MANAGED_MACHINE_POOL_FINALIZER, AzureManagedMachinePool};
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

use super::{Direction, Reconciler};
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    OPERATION_POLL_INTERVAL, add_finalizer, first_failure, is_deleting, object_key, owner_name, remove_finalizer,
    requeue_after,
};

impl Reconciler {
    /// Reconcile one AzureManagedMachinePool
    pub async fn reconcile_managed_machine_pool(
        &self,
        pool: Arc<AzureManagedMachinePool>,
    ) -> Result<Action, ControllerError> {
        let key = object_key(&pool.metadata);
        let namespace = pool.metadata.namespace.as_deref().unwrap_or_default();

        let Some(machine_pool_name) = owner_name(&pool.metadata, "MachinePool", CLUSTER_API_GROUP) else {
            info!(pool = %key, "waiting for MachinePool controller to set owner reference");
            return Ok(Action::await_change());
        };
        let Some(machine_pool) = self.client.get_machine_pool(namespace, &machine_pool_name).await? else {
            info!(pool = %key, machine_pool = %machine_pool_name, "owning MachinePool not found");
            return Ok(Action::await_change());
        };
        let cluster_name = Some(machine_pool.spec.cluster_name.clone())
            .filter(|name| !name.is_empty())
            .or_else(|| pool.metadata.labels.as_ref().and_then(|l| l.get(CLUSTER_NAME_LABEL)).cloned());
        let Some(cluster_name) = cluster_name else {
            info!(pool = %key, "MachinePool names no cluster");
            return Ok(Action::await_change());
        };
        let Some(cluster) = self.client.get_cluster(namespace, &cluster_name).await? else {
            info!(pool = %key, cluster = %cluster_name, "cluster not found");
            return Ok(Action::await_change());
        };
        if cluster.spec.paused {
            info!(pool = %key, "cluster is paused, skipping");
            return Ok(Action::await_change());
        }
        let cluster_deleting = is_deleting(&cluster.metadata);

        let control_plane = match self.infra_cluster_scope(cluster).await {
            Ok(Some(infra @ InfraClusterScope::Managed(_))) => infra,
            Ok(Some(_)) => {
                info!(pool = %key, "cluster is not backed by an AzureManagedControlPlane");
                return Ok(Action::await_change());
            }
            Ok(None) => {
                info!(pool = %key, "managed control plane not found");
                return Ok(Action::await_change());
            }
            Err(err) => {
                return Err(self
                    .report_scope_failure(ObjectKind::AzureManagedMachinePool, (*pool).clone(), err)
                    .await);
            }
        };

        let scope = ManagedMachinePoolScope::new(ManagedMachinePoolScopeParams {
            client: self.client.clone(),
            cluster: Arc::new(control_plane),
            machine_pool,
            managed_machine_pool: (*pool).clone(),
        })?;

        if !is_deleting(&pool.metadata) {
            self.apply_managed_machine_pool(scope).await
        } else if cluster_deleting {
            self.release_managed_machine_pool(scope).await
        } else {
            self.delete_managed_machine_pool(scope).await
        }
    }

    async fn apply_managed_machine_pool(&self, mut scope: ManagedMachinePoolScope) -> Result<Action, ControllerError> {
        add_finalizer(&mut scope.managed_machine_pool.metadata, AZURE_MANAGED_MACHINE_POOL_FINALIZER);

        let agent_pool: ResourceSpec = scope.agent_pool_spec().into();
        let family = ServiceSpecs {
            condition: AGENT_POOLS_READY,
            specs: vec![agent_pool.clone()],
        };
        let (outcomes, complete) = self
            .drive(&mut scope.managed_machine_pool, std::slice::from_ref(&family), Direction::Apply)
            .await;

        let ready = complete && self.observe_agent_pool_nodes(&mut scope, &agent_pool).await;
        scope.set_agent_pool_ready(ready);
        scope.close().await?;

        let action = if ready { requeue_after(&outcomes) } else { Action::requeue(OPERATION_POLL_INTERVAL) };
        match first_failure(outcomes) {
            Some(err) => Err(err.into()),
            None => Ok(action),
        }
    }

    /// Record the provider IDs and count of the agent pool's instances
    async fn observe_agent_pool_nodes(&self, scope: &mut ManagedMachinePoolScope, agent_pool: &ResourceSpec) -> bool {
        let pool_name = agent_pool.resource_name();
        match self.observe_scale_set(agent_pool).await {
            Ok(Some(state)) => {
                let provider_ids: Vec<String> = state.instances.iter().map(|i| i.provider_id.clone()).collect();
                let replicas = i32::try_from(provider_ids.len()).unwrap_or(i32::MAX);
                debug!(pool = pool_name, scale_set = %state.name, replicas, "observed agent pool scale set");
                scope.set_agent_pool_provider_id_list(provider_ids);
                scope.set_agent_pool_replicas(replicas);
                true
            }
            Ok(None) => {
                debug!(pool = pool_name, "agent pool scale set not observed yet");
                false
            }
            Err(err) => {
                warn!(pool = pool_name, error = %err, "failed to observe agent pool scale set");
                false
            }
        }
    }

    async fn delete_managed_machine_pool(&self, mut scope: ManagedMachinePoolScope) -> Result<Action, ControllerError> {
        let family = ServiceSpecs {
            condition: AGENT_POOLS_READY,
            specs: vec![scope.agent_pool_spec().into()],
        };
        let (outcomes, complete) = self
            .drive(&mut scope.managed_machine_pool, std::slice::from_ref(&family), Direction::Delete)
            .await;

        if complete {
            remove_finalizer(&mut scope.managed_machine_pool.metadata, AZURE_MANAGED_MACHINE_POOL_FINALIZER);
        }
        scope.close().await?;

        if let Some(err) = first_failure(outcomes) {
            return Err(err.into());
        }
        Ok(if complete {
            Action::await_change()
        } else {
            Action::requeue(OPERATION_POLL_INTERVAL)
        })
    }

    /// The managed cluster takes its agent pools with it
    async fn release_managed_machine_pool(&self, mut scope: ManagedMachinePoolScope) -> Result<Action, ControllerError> {
        info!(
            pool = %scope.managed_machine_pool.metadata.name.as_deref().unwrap_or_default(),
            "cluster is being deleted, leaving agent pool to the managed cluster"
        );
        remove_finalizer(&mut scope.managed_machine_pool.metadata, AZURE_MANAGED_MACHINE_POOL_FINALIZER);
        scope.close().await?;
        Ok(Action::await_change())
    }
}
