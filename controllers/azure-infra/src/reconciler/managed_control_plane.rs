//! AzureManagedControlPlane reconciliation

use std::sync::Arc;

use azure_scope::{ManagedControlPlaneScope, ManagedControlPlaneScopeParams, ObjectKind};
use crds::{AZURE_MANAGED_CONTROL_PLANE_FINALIZER, AzureManagedControlPlane};
use kube_runtime::controller::Action;
use tracing::info;

use super::{Direction, Reconciler};
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    OPERATION_POLL_INTERVAL, add_finalizer, first_failure, is_deleting, object_key, remove_finalizer, requeue_after,
};

impl Reconciler {
    /// Reconcile one AzureManagedControlPlane
    pub async fn reconcile_managed_control_plane(
        &self,
        control_plane: Arc<AzureManagedControlPlane>,
    ) -> Result<Action, ControllerError> {
        let key = object_key(&control_plane.metadata);

        let Some(cluster) = self.owner_cluster(&control_plane.metadata).await? else {
            info!(control_plane = %key, "waiting for Cluster controller to set owner reference");
            return Ok(Action::await_change());
        };
        if cluster.spec.paused {
            info!(control_plane = %key, "cluster is paused, skipping");
            return Ok(Action::await_change());
        }

        let params = ManagedControlPlaneScopeParams {
            client: self.client.clone(),
            azure_clients: self.azure_clients(),
            cluster,
            control_plane: (*control_plane).clone(),
        };
        let scope = match ManagedControlPlaneScope::new(params).await {
            Ok(scope) => scope,
            Err(err) => {
                return Err(self
                    .report_scope_failure(ObjectKind::AzureManagedControlPlane, (*control_plane).clone(), err)
                    .await);
            }
        };

        if is_deleting(&control_plane.metadata) {
            self.delete_managed_control_plane(scope).await
        } else {
            self.apply_managed_control_plane(scope).await
        }
    }

    async fn apply_managed_control_plane(&self, mut scope: ManagedControlPlaneScope) -> Result<Action, ControllerError> {
        add_finalizer(&mut scope.control_plane.metadata, AZURE_MANAGED_CONTROL_PLANE_FINALIZER);

        // Invalid pools or network settings are user errors: persist the
        // finalizer, then surface the error without touching Azure.
        let families = match scope.resource_specs().await {
            Ok(families) => families,
            Err(err) => {
                scope.close().await?;
                return Err(err.into());
            }
        };
        let (outcomes, complete) = self.drive(&mut scope.control_plane, &families, Direction::Apply).await;

        if complete {
            scope.set_ready(true);
            if scope.kubeconfig_data().is_some() {
                scope.apply_kubeconfig().await?;
                scope.set_initialized(true);
            }
        }
        scope.close().await?;

        let action = requeue_after(&outcomes);
        match first_failure(outcomes) {
            Some(err) => Err(err.into()),
            None => Ok(action),
        }
    }

    async fn delete_managed_control_plane(
        &self,
        mut scope: ManagedControlPlaneScope,
    ) -> Result<Action, ControllerError> {
        // The managed cluster takes its agent pools with it; only the
        // cluster, subnet, VNet and group are deleted explicitly.
        let families: Vec<_> = scope
            .resource_specs()
            .await?
            .into_iter()
            .filter(|f| f.condition != crds::conditions::AGENT_POOLS_READY)
            .collect();
        let (outcomes, complete) = self.drive(&mut scope.control_plane, &families, Direction::Delete).await;

        if complete {
            info!(cluster = %scope.cluster.metadata.name.as_deref().unwrap_or_default(), "managed cluster deleted");
            remove_finalizer(&mut scope.control_plane.metadata, AZURE_MANAGED_CONTROL_PLANE_FINALIZER);
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
    use crds::cluster_api::CLUSTER_NAME_LABEL;
    use crds::conditions::MANAGED_CLUSTER_RUNNING;
    use serde_json::json;

    fn add_system_pool(client: &MockScopeClient) {
        client.add_managed_machine_pool(
            serde_json::from_value(json!({
                "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
                "kind": "AzureManagedMachinePool",
                "metadata": {
                    "name": "pool0",
                    "namespace": NAMESPACE,
                    "labels": {CLUSTER_NAME_LABEL: "my-cluster"},
                    "ownerReferences": [owner("MachinePool", "cluster.x-k8s.io/v1beta1", "mp0")]
                },
                "spec": {"mode": "System", "sku": "Standard_D2s_v3"}
            }))
            .unwrap(),
        );
        client.add_machine_pool(
            serde_json::from_value(json!({
                "apiVersion": "cluster.x-k8s.io/v1beta1",
                "kind": "MachinePool",
                "metadata": {"name": "mp0", "namespace": NAMESPACE},
                "spec": {"clusterName": "my-cluster", "template": {"spec": {"clusterName": "my-cluster"}}}
            }))
            .unwrap(),
        );
    }

    fn every_operator(reconciler: Reconciler) -> Reconciler {
        ["group", "virtualnetworks", "subnets", "managedclusters", "agentpools"]
            .into_iter()
            .fold(reconciler, |r, service| r.with_operator(RecordingOperator::done(service)))
    }

    #[tokio::test]
    async fn test_missing_system_pool_is_reported_after_close() {
        let client = MockScopeClient::new();
        client.add_cluster(cluster("my-cluster"));
        let reconciler = every_operator(Reconciler::new(Arc::new(client.clone()), settings()));

        let err = reconciler
            .reconcile_managed_control_plane(Arc::new(control_plane()))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Scope(azure_scope::ScopeError::NoSystemPool)));

        let spec_patch = client.patches().into_iter().find(|p| !p.status).unwrap();
        assert_eq!(
            spec_patch.patch["metadata"]["finalizers"][0],
            AZURE_MANAGED_CONTROL_PLANE_FINALIZER
        );
    }

    #[tokio::test]
    async fn test_apply_marks_ready_when_every_family_succeeds() {
        let client = MockScopeClient::new();
        client.add_cluster(cluster("my-cluster"));
        add_system_pool(&client);
        let pools = RecordingOperator::done("agentpools");
        let reconciler = every_operator(Reconciler::new(Arc::new(client.clone()), settings())).with_operator(pools.clone());

        let action = reconciler
            .reconcile_managed_control_plane(Arc::new(control_plane()))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(crate::reconcile_helpers::RESYNC_INTERVAL));
        assert_eq!(pools.calls(), vec!["create pool0"]);

        let status_patch = client.patches().into_iter().find(|p| p.status).unwrap();
        assert_eq!(status_patch.patch["status"]["ready"], true);
        let conditions = status_patch.patch["status"]["conditions"].as_array().unwrap();
        assert!(
            conditions
                .iter()
                .any(|c| c["type"] == MANAGED_CLUSTER_RUNNING && c["status"] == "True")
        );
        // No kubeconfig was fetched, so no secret and not initialized
        assert!(client.secret(NAMESPACE, "my-cluster-kubeconfig").is_none());
    }

    #[tokio::test]
    async fn test_delete_skips_agent_pools() {
        let client = MockScopeClient::new();
        client.add_cluster(cluster("my-cluster"));
        add_system_pool(&client);
        let log = SharedLog::default();
        let reconciler = ["group", "virtualnetworks", "subnets", "managedclusters", "agentpools"]
            .into_iter()
            .fold(Reconciler::new(Arc::new(client.clone()), settings()), |r, service| {
                let operator = RecordingOperator::done(service);
                operator.share_log(&log);
                r.with_operator(operator)
            });
        let mut cp = control_plane();
        cp.metadata.finalizers = Some(vec![AZURE_MANAGED_CONTROL_PLANE_FINALIZER.to_string()]);
        cp.metadata.deletion_timestamp = Some(serde_json::from_value(json!("2024-01-01T00:00:00Z")).unwrap());

        let action = reconciler.reconcile_managed_control_plane(Arc::new(cp)).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(
            log.entries(),
            vec!["delete my-cluster", "delete my-subnet", "delete my-vnet", "delete my-rg"]
        );
    }
}
