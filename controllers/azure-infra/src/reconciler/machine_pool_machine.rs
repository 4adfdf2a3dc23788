//! AzureMachinePoolMachine reconciliation
//!
//! Binds each scale set instance record to its workload Node and, when the
//! record is deleted, cordons and drains that Node before letting go of the
//! finalizer. Instance deletion itself belongs to the scale set executor.

use std::sync::Arc;

use azure_scope::{MachinePoolMachineScope, MachinePoolMachineScopeParams, ObjectKind};
use crds::cluster_api::CLUSTER_NAME_LABEL;
use crds::{AZURE_MACHINE_POOL_MACHINE_FINALIZER, AzureMachinePoolMachine};
use kube_runtime::controller::Action;
use tracing::{debug, info};

use super::{INFRASTRUCTURE_GROUP, Reconciler};
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    OPERATION_POLL_INTERVAL, RESYNC_INTERVAL, is_deleting, object_key, owner_name, remove_finalizer,
};

impl Reconciler {
    /// Reconcile one AzureMachinePoolMachine
    pub async fn reconcile_machine_pool_machine(
        &self,
        machine: Arc<AzureMachinePoolMachine>,
    ) -> Result<Action, ControllerError> {
        let key = object_key(&machine.metadata);
        let namespace = machine.metadata.namespace.as_deref().unwrap_or_default();

        let Some(pool_name) = owner_name(&machine.metadata, "AzureMachinePool", INFRASTRUCTURE_GROUP) else {
            debug!(machine = %key, "no owning AzureMachinePool yet");
            return Ok(Action::await_change());
        };
        let Some(pool) = self.client.get_azure_machine_pool(namespace, &pool_name).await? else {
            info!(machine = %key, pool = %pool_name, "owning AzureMachinePool not found");
            return Ok(Action::await_change());
        };

        let cluster_name = machine
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(CLUSTER_NAME_LABEL))
            .or_else(|| pool.metadata.labels.as_ref().and_then(|l| l.get(CLUSTER_NAME_LABEL)))
            .cloned();
        let Some(cluster_name) = cluster_name else {
            info!(machine = %key, "machine carries no cluster name label");
            return Ok(Action::await_change());
        };
        let Some(cluster) = self.client.get_cluster(namespace, &cluster_name).await? else {
            info!(machine = %key, cluster = %cluster_name, "cluster not found");
            return Ok(Action::await_change());
        };
        if cluster.spec.paused {
            info!(machine = %key, "cluster is paused, skipping");
            return Ok(Action::await_change());
        }

        let infra = match self.infra_cluster_scope(cluster).await {
            Ok(Some(infra)) => infra,
            Ok(None) => {
                info!(machine = %key, "infrastructure cluster not ready");
                return Ok(Action::await_change());
            }
            Err(err) => {
                return Err(self
                    .report_scope_failure(ObjectKind::AzureMachinePoolMachine, (*machine).clone(), err)
                    .await);
            }
        };

        let mut scope = MachinePoolMachineScope::new(MachinePoolMachineScopeParams {
            client: self.client.clone(),
            cluster: Arc::new(infra),
            azure_machine_pool: pool,
            machine: (*machine).clone(),
        })?;

        if is_deleting(&machine.metadata) {
            let drained = scope.cordon_and_drain().await;
            if drained.is_ok() {
                remove_finalizer(&mut scope.machine.metadata, AZURE_MACHINE_POOL_MACHINE_FINALIZER);
            }
            scope.close().await?;
            drained?;
            return Ok(Action::await_change());
        }

        let updated = scope.update_node_status().await;
        let ready = scope.machine.status.as_ref().is_some_and(|s| s.ready);
        scope.close().await?;
        updated?;

        Ok(if ready {
            Action::requeue(RESYNC_INTERVAL)
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
    use crds::conditions::{self, DRAINING_SUCCEEDED, MACHINE_NODE_HEALTHY};
    use crds::{AzureCluster, AzureClusterSpec, MACHINE_POOL_NAME_LABEL, ObjectReference};
    use k8s_openapi::api::core::v1::{Node, Pod};
    use serde_json::json;

    const PROVIDER_ID: &str = "azure:///subscriptions/123/resourceGroups/my-rg/providers/Microsoft.Compute/virtualMachineScaleSets/pool1/virtualMachines/0";

    fn seed(client: &MockScopeClient) {
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

        client.add_azure_machine_pool(
            serde_json::from_value(json!({
                "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
                "kind": "AzureMachinePool",
                "metadata": {
                    "name": "pool1",
                    "namespace": NAMESPACE,
                    "uid": "pool1-uid",
                    "labels": {CLUSTER_NAME_LABEL: "my-cluster"}
                },
                "spec": {"location": "westus2", "template": {"vmSize": "Standard_D2s_v3"}}
            }))
            .unwrap(),
        );
    }

    fn machine() -> AzureMachinePoolMachine {
        serde_json::from_value(json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
            "kind": "AzureMachinePoolMachine",
            "metadata": {
                "name": "pool1-0",
                "namespace": NAMESPACE,
                "resourceVersion": "3",
                "labels": {CLUSTER_NAME_LABEL: "my-cluster", MACHINE_POOL_NAME_LABEL: "pool1"},
                "finalizers": [AZURE_MACHINE_POOL_MACHINE_FINALIZER],
                "ownerReferences": [owner("AzureMachinePool", "infrastructure.cluster.x-k8s.io/v1beta1", "pool1")]
            },
            "spec": {"providerID": PROVIDER_ID, "instanceID": "0"}
        }))
        .unwrap()
    }

    fn node(name: &str, ready: bool) -> Node {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {"name": name, "uid": format!("{name}-uid")},
            "spec": {"providerID": PROVIDER_ID},
            "status": {"conditions": [{"type": "Ready", "status": if ready { "True" } else { "False" }}]}
        }))
        .unwrap()
    }

    fn pod(name: &str, node: &str) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": "apps"},
            "spec": {"nodeName": node, "containers": []}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_machine_without_pool_owner_waits() {
        let client = MockScopeClient::new();
        seed(&client);
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings());
        let mut orphan = machine();
        orphan.metadata.owner_references = None;

        let action = reconciler.reconcile_machine_pool_machine(Arc::new(orphan)).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(client.patches().is_empty());
    }

    #[tokio::test]
    async fn test_ready_node_is_bound_and_resynced() {
        let client = MockScopeClient::new();
        seed(&client);
        client.workload().add_node(node("vmss-0", true));
        client.add_machine_pool_machine(machine());
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings());

        let action = reconciler.reconcile_machine_pool_machine(Arc::new(machine())).await.unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));

        let status_patch = client.patches().into_iter().find(|p| p.status).unwrap();
        assert_eq!(status_patch.patch["status"]["ready"], true);
        assert_eq!(status_patch.patch["status"]["nodeRef"]["name"], "vmss-0");
    }

    #[tokio::test]
    async fn test_missing_node_is_polled() {
        let client = MockScopeClient::new();
        seed(&client);
        client.add_machine_pool_machine(machine());
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings());

        let action = reconciler.reconcile_machine_pool_machine(Arc::new(machine())).await.unwrap();
        assert_eq!(action, Action::requeue(OPERATION_POLL_INTERVAL));

        let stored = client.machine_pool_machines().pop().unwrap();
        assert!(conditions::is_false(&stored, MACHINE_NODE_HEALTHY));
    }

    #[tokio::test]
    async fn test_deleted_machine_drains_then_releases_finalizer() {
        let client = MockScopeClient::new();
        seed(&client);
        client.workload().add_node(node("vmss-0", true));
        client.workload().add_pod(pod("web", "vmss-0"));
        let mut deleting = machine();
        deleting.metadata.deletion_timestamp = Some(serde_json::from_value(json!("2024-01-01T00:00:00Z")).unwrap());
        client.add_machine_pool_machine(deleting.clone());
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings());

        let action = reconciler.reconcile_machine_pool_machine(Arc::new(deleting)).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(client.workload().cordoned(), vec!["vmss-0"]);
        assert_eq!(client.workload().evicted(), vec!["apps/web"]);

        let stored = client.machine_pool_machines().pop().unwrap();
        assert_eq!(stored.metadata.finalizers, Some(vec![]));
        assert!(conditions::is_true(&stored, DRAINING_SUCCEEDED));
    }
}
