//! AzureMachinePool reconciliation
//!
//! Drives the pool's scale set, then hands what the scale set executor
//! observed to the scope. Closing the scope binds one
//! AzureMachinePoolMachine record per instance, deletes orphaned and
//! surplus records and maps the scale set state onto the pool conditions.

use std::sync::Arc;

use azure_scope::{MachinePoolScope, MachinePoolScopeParams, ObjectKind, ResourceSpec, ServiceSpecs};
use crds::azure_machine_pool::ProvisioningState;
use crds::cluster_api::{CLUSTER_API_GROUP, CLUSTER_NAME_LABEL};
use crds::conditions::SCALE_SET_RUNNING;
use crds::{AZURE_MACHINE_POOL_FINALIZER, AzureMachinePool};
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

use super::{Direction, Reconciler};
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    OPERATION_POLL_INTERVAL, add_finalizer, first_failure, is_deleting, object_key, owner_name, remove_finalizer,
    requeue_after,
};

fn scale_set_family(scope: &MachinePoolScope) -> ServiceSpecs {
    ServiceSpecs {
        condition: SCALE_SET_RUNNING,
        specs: vec![scope.scale_set_spec().into()],
    }
}

impl Reconciler {
    /// Reconcile one AzureMachinePool
    pub async fn reconcile_azure_machine_pool(&self, pool: Arc<AzureMachinePool>) -> Result<Action, ControllerError> {
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

        let cluster_name = if machine_pool.spec.cluster_name.is_empty() {
            pool.metadata.labels.as_ref().and_then(|l| l.get(CLUSTER_NAME_LABEL)).cloned()
        } else {
            Some(machine_pool.spec.cluster_name.clone())
        };
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

        let infra = match self.infra_cluster_scope(cluster).await {
            Ok(Some(infra)) => infra,
            Ok(None) => {
                info!(pool = %key, "infrastructure cluster not ready");
                return Ok(Action::await_change());
            }
            Err(err) => {
                return Err(self
                    .report_scope_failure(ObjectKind::AzureMachinePool, (*pool).clone(), err)
                    .await);
            }
        };

        let scope = MachinePoolScope::new(MachinePoolScopeParams {
            client: self.client.clone(),
            cluster: Arc::new(infra),
            machine_pool,
            azure_machine_pool: (*pool).clone(),
        })?;

        if is_deleting(&pool.metadata) {
            self.delete_azure_machine_pool(scope).await
        } else {
            self.apply_azure_machine_pool(scope).await
        }
    }

    async fn apply_azure_machine_pool(&self, mut scope: MachinePoolScope) -> Result<Action, ControllerError> {
        add_finalizer(&mut scope.azure_machine_pool.metadata, AZURE_MACHINE_POOL_FINALIZER);

        let family = scale_set_family(&scope);
        let (outcomes, _) = self
            .drive(&mut scope.azure_machine_pool, std::slice::from_ref(&family), Direction::Apply)
            .await;

        let settled = match family.specs.first() {
            Some(spec) => self.observe_pool_scale_set(&mut scope, spec).await,
            None => false,
        };
        scope.close().await?;

        let action = if settled { requeue_after(&outcomes) } else { Action::requeue(OPERATION_POLL_INTERVAL) };
        match first_failure(outcomes) {
            Some(err) => Err(err.into()),
            None => Ok(action),
        }
    }

    /// Feed the observed scale set to the scope; true once it runs the desired capacity
    async fn observe_pool_scale_set(&self, scope: &mut MachinePoolScope, spec: &ResourceSpec) -> bool {
        match self.observe_scale_set(spec).await {
            Ok(Some(state)) => {
                let settled = state.state == ProvisioningState::Succeeded
                    && state.capacity == i64::from(scope.desired_replicas());
                debug!(pool = %scope.name(), instances = state.instances.len(), settled, "observed scale set");
                scope.set_vmss_state(state);
                settled
            }
            Ok(None) => {
                debug!(pool = %scope.name(), "scale set not observed yet");
                false
            }
            Err(err) => {
                warn!(pool = %scope.name(), error = %err, "failed to observe scale set");
                false
            }
        }
    }

    async fn delete_azure_machine_pool(&self, mut scope: MachinePoolScope) -> Result<Action, ControllerError> {
        // Machine records are owned by the pool and garbage collected with it
        let family = scale_set_family(&scope);
        let (outcomes, complete) = self
            .drive(&mut scope.azure_machine_pool, std::slice::from_ref(&family), Direction::Delete)
            .await;

        if complete {
            info!(pool = %scope.name(), "scale set deleted");
            remove_finalizer(&mut scope.azure_machine_pool.metadata, AZURE_MACHINE_POOL_FINALIZER);
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
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use azure_scope::mock::MockScopeClient;
    use azure_scope::{ScaleSetInstance, ScaleSetState};
    use crds::conditions::SCALE_SET_DESIRED_REPLICAS;
    use crds::{AzureCluster, AzureClusterSpec, AzureMachinePoolMachine, MACHINE_POOL_NAME_LABEL, ObjectReference};
    use serde_json::json;

    fn provider_id(instance_id: &str) -> String {
        format!(
            "azure:///subscriptions/123/resourceGroups/my-rg/providers/Microsoft.Compute/virtualMachineScaleSets/pool1/virtualMachines/{instance_id}"
        )
    }

    fn seed(client: &MockScopeClient, replicas: i32) {
        let mut owner = cluster("my-cluster");
        owner.spec.infrastructure_ref = Some(ObjectReference::new("AzureCluster", "my-cluster"));
        client.add_cluster(owner);

        let mut azure_cluster = AzureCluster::new(
            "my-cluster",
            AzureClusterSpec {
                resource_group: "my-rg".to_string(),
                subscription_id: "123".to_string(),
                location: "westus2".to_string(),
                ..Default::default()
            },
        );
        azure_cluster.metadata.namespace = Some(NAMESPACE.to_string());
        client.add_azure_cluster(azure_cluster);

        client.add_machine_pool(
            serde_json::from_value(json!({
                "apiVersion": "cluster.x-k8s.io/v1beta1",
                "kind": "MachinePool",
                "metadata": {"name": "mp1", "namespace": NAMESPACE},
                "spec": {
                    "clusterName": "my-cluster",
                    "replicas": replicas,
                    "template": {"spec": {"clusterName": "my-cluster", "version": "v1.29.4"}}
                }
            }))
            .unwrap(),
        );
    }

    fn pool() -> AzureMachinePool {
        serde_json::from_value(json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
            "kind": "AzureMachinePool",
            "metadata": {
                "name": "pool1",
                "namespace": NAMESPACE,
                "uid": "pool1-uid",
                "resourceVersion": "4",
                "labels": {CLUSTER_NAME_LABEL: "my-cluster"},
                "ownerReferences": [owner("MachinePool", "cluster.x-k8s.io/v1beta1", "mp1")]
            },
            "spec": {
                "location": "westus2",
                "template": {"vmSize": "Standard_D2s_v3", "osDisk": {"osType": "Linux"}}
            }
        }))
        .unwrap()
    }

    fn record(instance_id: &str) -> AzureMachinePoolMachine {
        serde_json::from_value(json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
            "kind": "AzureMachinePoolMachine",
            "metadata": {
                "name": format!("pool1-{instance_id}"),
                "namespace": NAMESPACE,
                "labels": {CLUSTER_NAME_LABEL: "my-cluster", MACHINE_POOL_NAME_LABEL: "pool1"}
            },
            "spec": {"providerID": provider_id(instance_id), "instanceID": instance_id},
            "status": {"ready": true, "latestModelApplied": true}
        }))
        .unwrap()
    }

    fn scale_set(state: ProvisioningState, instance_ids: &[&str]) -> ScaleSetState {
        ScaleSetState {
            id: "vmss-id".to_string(),
            name: "pool1".to_string(),
            capacity: instance_ids.len() as i64,
            state,
            instances: instance_ids
                .iter()
                .map(|id| ScaleSetInstance {
                    id: provider_id(id).trim_start_matches("azure://").to_string(),
                    instance_id: id.to_string(),
                    name: format!("pool100000{id}"),
                    provider_id: provider_id(id),
                    state: ProvisioningState::Succeeded,
                    latest_model_applied: true,
                    zone: None,
                })
                .collect(),
        }
    }

    fn stored_names(client: &MockScopeClient) -> Vec<String> {
        client
            .machine_pool_machines()
            .into_iter()
            .filter_map(|m| m.metadata.name)
            .collect()
    }

    #[tokio::test]
    async fn test_waits_for_machine_pool_owner() {
        let client = MockScopeClient::new();
        seed(&client, 2);
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings());
        let mut orphan = pool();
        orphan.metadata.owner_references = None;

        let action = reconciler.reconcile_azure_machine_pool(Arc::new(orphan)).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(client.patches().is_empty());
    }

    #[tokio::test]
    async fn test_paused_cluster_is_skipped() {
        let client = MockScopeClient::new();
        seed(&client, 2);
        let mut paused = cluster("my-cluster");
        paused.spec.paused = true;
        paused.spec.infrastructure_ref = Some(ObjectReference::new("AzureCluster", "my-cluster"));
        client.add_cluster(paused);
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings());

        let action = reconciler.reconcile_azure_machine_pool(Arc::new(pool())).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(client.patches().is_empty());
    }

    #[tokio::test]
    async fn test_apply_binds_records_to_observed_instances() {
        let client = MockScopeClient::new();
        seed(&client, 2);
        client.add_machine_pool_machine(record("7"));
        let scale_sets = RecordingOperator::done("scalesets");
        scale_sets.observe(scale_set(ProvisioningState::Succeeded, &["0", "1"]));
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings()).with_operator(scale_sets.clone());

        let action = reconciler.reconcile_azure_machine_pool(Arc::new(pool())).await.unwrap();
        assert_eq!(action, Action::requeue(crate::reconcile_helpers::RESYNC_INTERVAL));
        assert_eq!(scale_sets.calls(), vec!["create pool1"]);

        // One record per instance; the record without an instance is gone
        assert_eq!(stored_names(&client), vec!["pool1-0", "pool1-1"]);
        assert_eq!(client.deleted_machines(), vec!["pool1-7"]);

        let patches = client.patches();
        let pool_spec_patch = patches
            .iter()
            .find(|p| p.kind == ObjectKind::AzureMachinePool && !p.status)
            .unwrap();
        assert_eq!(pool_spec_patch.patch["metadata"]["finalizers"][0], AZURE_MACHINE_POOL_FINALIZER);
        assert_eq!(
            pool_spec_patch.patch["spec"]["providerIDList"],
            json!([provider_id("0"), provider_id("1")])
        );
    }

    #[tokio::test]
    async fn test_surplus_machine_is_reaped_through_rolling_update() {
        let client = MockScopeClient::new();
        seed(&client, 2);
        for id in ["0", "1", "2"] {
            client.add_machine_pool_machine(record(id));
        }
        let mut stale = record("3");
        stale.status.as_mut().unwrap().latest_model_applied = false;
        client.add_machine_pool_machine(stale);
        let scale_sets = RecordingOperator::done("scalesets");
        scale_sets.observe(scale_set(ProvisioningState::Succeeded, &["0", "1", "2", "3"]));
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings()).with_operator(scale_sets);

        let action = reconciler.reconcile_azure_machine_pool(Arc::new(pool())).await.unwrap();

        // Capacity still above the desired count, so the pass polls again
        assert_eq!(action, Action::requeue(OPERATION_POLL_INTERVAL));
        assert_eq!(client.deleted_machines(), vec!["pool1-3"]);
        let status_patch = client
            .patches()
            .into_iter()
            .find(|p| p.kind == ObjectKind::AzureMachinePool && p.status)
            .unwrap();
        let conditions = status_patch.patch["status"]["conditions"].as_array().unwrap();
        assert!(
            conditions
                .iter()
                .any(|c| c["type"] == SCALE_SET_DESIRED_REPLICAS && c["status"] == "False")
        );
    }

    #[tokio::test]
    async fn test_unobserved_scale_set_is_polled() {
        let client = MockScopeClient::new();
        seed(&client, 2);
        let reconciler =
            Reconciler::new(Arc::new(client.clone()), settings()).with_operator(RecordingOperator::done("scalesets"));

        let action = reconciler.reconcile_azure_machine_pool(Arc::new(pool())).await.unwrap();
        assert_eq!(action, Action::requeue(OPERATION_POLL_INTERVAL));
        assert!(client.machine_pool_machines().is_empty());

        let status_patch = client.patches().into_iter().find(|p| p.status).unwrap();
        let conditions = status_patch.patch["status"]["conditions"].as_array().unwrap();
        assert!(
            conditions
                .iter()
                .any(|c| c["type"] == SCALE_SET_RUNNING && c["status"] == "True")
        );
    }

    #[tokio::test]
    async fn test_delete_releases_finalizer_once_scale_set_is_gone() {
        let client = MockScopeClient::new();
        seed(&client, 2);
        let scale_sets = RecordingOperator::done("scalesets");
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings()).with_operator(scale_sets.clone());
        let mut deleting = pool();
        deleting.metadata.finalizers = Some(vec![AZURE_MACHINE_POOL_FINALIZER.to_string()]);
        deleting.metadata.deletion_timestamp = Some(serde_json::from_value(json!("2024-01-01T00:00:00Z")).unwrap());

        let action = reconciler.reconcile_azure_machine_pool(Arc::new(deleting)).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(scale_sets.calls(), vec!["delete pool1"]);

        let spec_patch = client.patches().into_iter().find(|p| !p.status).unwrap();
        assert_eq!(spec_patch.patch["metadata"]["finalizers"], json!([]));
    }
}
