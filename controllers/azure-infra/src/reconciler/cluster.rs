//! AzureCluster reconciliation

use std::sync::Arc;

use azure_scope::{ClusterScope, ClusterScopeParams, ObjectKind, ResourceSpec, ScopeError, ServiceSpecs};
use crds::cluster_api::ApiEndpoint;
use crds::conditions::{self, SECURITY_GROUPS_READY};
use crds::{AZURE_CLUSTER_FINALIZER, AzureCluster};
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

use super::{Direction, Reconciler};
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    OPERATION_POLL_INTERVAL, add_finalizer, first_failure, is_deleting, object_key, remove_finalizer, requeue_after,
};

impl Reconciler {
    /// Reconcile one AzureCluster
    pub async fn reconcile_azure_cluster(&self, azure_cluster: Arc<AzureCluster>) -> Result<Action, ControllerError> {
        let key = object_key(&azure_cluster.metadata);

        let Some(cluster) = self.owner_cluster(&azure_cluster.metadata).await? else {
            info!(azure_cluster = %key, "waiting for Cluster controller to set owner reference");
            return Ok(Action::await_change());
        };
        if cluster.spec.paused {
            info!(azure_cluster = %key, "cluster is paused, skipping");
            return Ok(Action::await_change());
        }

        let params = ClusterScopeParams {
            client: self.client.clone(),
            azure_clients: self.azure_clients(),
            cluster,
            azure_cluster: (*azure_cluster).clone(),
        };
        let scope = match ClusterScope::new(params).await {
            Ok(scope) => scope,
            Err(err) => {
                return Err(self
                    .report_scope_failure(ObjectKind::AzureCluster, (*azure_cluster).clone(), err)
                    .await);
            }
        };

        if is_deleting(&azure_cluster.metadata) {
            self.delete_azure_cluster(scope).await
        } else {
            self.apply_azure_cluster(scope).await
        }
    }

    async fn apply_azure_cluster(&self, mut scope: ClusterScope) -> Result<Action, ControllerError> {
        add_finalizer(&mut scope.azure_cluster.metadata, AZURE_CLUSTER_FINALIZER);
        scope.set_defaults();
        scope.set_control_plane_security_rules();

        let families = match scope.resource_specs() {
            Ok(families) => families,
            Err(err) => {
                scope.close().await?;
                return Err(err.into());
            }
        };
        let (outcomes, complete) = self.drive(&mut scope.azure_cluster, &families, Direction::Apply).await;

        if conditions::is_true(&scope.azure_cluster, SECURITY_GROUPS_READY)
            && let Err(err) = record_applied_security_rules(&mut scope, &families)
        {
            warn!(error = %err, "failed to record applied security rules");
        }
        if complete {
            if let Err(err) = record_applied_tags(&mut scope, &families) {
                warn!(error = %err, "failed to record applied tags");
            }
            let endpoint = ApiEndpoint {
                host: scope.api_server_host(),
                port: scope.api_server_port(),
            };
            scope.set_control_plane_endpoint(endpoint);
            scope.set_ready(true);
        }
        debug!(
            cluster = %scope.azure_cluster.metadata.name.as_deref().unwrap_or_default(),
            complete,
            "applied cluster infrastructure"
        );
        scope.close().await?;

        let action = requeue_after(&outcomes);
        match first_failure(outcomes) {
            Some(err) => Err(err.into()),
            None => Ok(action),
        }
    }

    async fn delete_azure_cluster(&self, mut scope: ClusterScope) -> Result<Action, ControllerError> {
        // Tags go away with the resource group
        let families: Vec<_> = scope
            .resource_specs()?
            .into_iter()
            .filter(|f| !f.specs.iter().any(|s| matches!(s, ResourceSpec::Tags(_))))
            .collect();
        let (outcomes, complete) = self.drive(&mut scope.azure_cluster, &families, Direction::Delete).await;

        if complete {
            info!(
                cluster = %scope.azure_cluster.metadata.name.as_deref().unwrap_or_default(),
                "cluster infrastructure deleted"
            );
            remove_finalizer(&mut scope.azure_cluster.metadata, AZURE_CLUSTER_FINALIZER);
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

/// Remember the rules now on each NSG so removed rules can be detected next pass
fn record_applied_security_rules(scope: &mut ClusterScope, families: &[ServiceSpecs]) -> Result<(), ScopeError> {
    let nsgs = families
        .iter()
        .filter(|f| f.condition == SECURITY_GROUPS_READY)
        .flat_map(|f| f.specs.iter());
    for spec in nsgs {
        if let ResourceSpec::SecurityGroup(nsg) = spec {
            scope.update_annotation_security_rules(&nsg.name, nsg.security_rules.clone())?;
        }
    }
    Ok(())
}

/// Remember the tags now on each tagged resource so dropped tags can be removed next pass
fn record_applied_tags(scope: &mut ClusterScope, families: &[ServiceSpecs]) -> Result<(), ScopeError> {
    for spec in families.iter().flat_map(|f| f.specs.iter()) {
        if let ResourceSpec::Tags(tags) = spec {
            scope.update_annotation_tags(&tags.annotation, &tags.tags)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use azure_credentials::EnvSettings;
    use azure_scope::mock::MockScopeClient;
    use crds::AzureClusterSpec;
    use azure_scope::tags::RESOURCE_GROUP_TAGS_LAST_APPLIED_ANNOTATION;
    use crds::conditions::{READY, RESOURCE_GROUP_READY, reasons};

    fn azure_cluster(name: &str, owner: Option<&str>) -> AzureCluster {
        let mut azure_cluster = AzureCluster::new(
            name,
            AzureClusterSpec {
                resource_group: "my-rg".to_string(),
                subscription_id: "123".to_string(),
                location: "westus2".to_string(),
                ..Default::default()
            },
        );
        azure_cluster.metadata.namespace = Some(NAMESPACE.to_string());
        azure_cluster.metadata.resource_version = Some("1".to_string());
        azure_cluster.metadata.owner_references = owner.map(|o| vec![cluster_owner(o)]);
        azure_cluster
    }

    fn every_operator(reconciler: Reconciler) -> Reconciler {
        [
            "group",
            "tags",
            "virtualnetworks",
            "securitygroups",
            "routetables",
            "publicips",
            "natgateways",
            "subnets",
            "vnetpeerings",
            "loadbalancers",
            "bastionhosts",
        ]
        .into_iter()
        .fold(reconciler, |r, service| r.with_operator(RecordingOperator::done(service)))
    }

    #[tokio::test]
    async fn test_waits_for_owner_cluster() {
        let client = MockScopeClient::new();
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings());

        let action = reconciler
            .reconcile_azure_cluster(Arc::new(azure_cluster("my-cluster", None)))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert!(client.patches().is_empty());
    }

    #[tokio::test]
    async fn test_paused_cluster_is_skipped() {
        let client = MockScopeClient::new();
        let mut owner = cluster("my-cluster");
        owner.spec.paused = true;
        client.add_cluster(owner);
        let reconciler = Reconciler::new(Arc::new(client.clone()), settings());

        let action = reconciler
            .reconcile_azure_cluster(Arc::new(azure_cluster("my-cluster", Some("my-cluster"))))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert!(client.patches().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credentials_mark_auth_failed() {
        let client = MockScopeClient::new();
        client.add_cluster(cluster("my-cluster"));
        let mut ac = azure_cluster("my-cluster", Some("my-cluster"));
        ac.spec.subscription_id = String::new();
        let reconciler = Reconciler::new(Arc::new(client.clone()), EnvSettings::default());

        let err = reconciler.reconcile_azure_cluster(Arc::new(ac)).await.unwrap_err();
        assert!(err.is_auth_failure());

        let patches = client.patches();
        assert_eq!(patches.len(), 1);
        assert!(patches[0].status);
        let condition = &patches[0].patch["status"]["conditions"][0];
        assert_eq!(condition["type"], READY);
        assert_eq!(condition["reason"], reasons::AUTH_FAILED);
    }

    #[tokio::test]
    async fn test_apply_persists_defaults_and_finalizer() {
        let client = MockScopeClient::new();
        client.add_cluster(cluster("my-cluster"));
        let reconciler =
            Reconciler::new(Arc::new(client.clone()), settings()).with_operator(RecordingOperator::done("group"));

        let action = reconciler
            .reconcile_azure_cluster(Arc::new(azure_cluster("my-cluster", Some("my-cluster"))))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(crate::reconcile_helpers::RESYNC_INTERVAL));

        let patches = client.patches();
        let spec_patch = &patches[0];
        assert!(!spec_patch.status);
        assert_eq!(spec_patch.patch["metadata"]["finalizers"][0], AZURE_CLUSTER_FINALIZER);
        assert_eq!(spec_patch.patch["spec"]["networkSpec"]["vnet"]["name"], "my-cluster-vnet");

        let status_patch = patches.iter().find(|p| p.status).unwrap();
        let conditions = status_patch.patch["status"]["conditions"].as_array().unwrap();
        assert!(
            conditions
                .iter()
                .any(|c| c["type"] == RESOURCE_GROUP_READY && c["status"] == "True")
        );
        // Families without an executor leave the cluster not ready
        assert!(status_patch.patch["status"].get("ready").is_none_or(|r| r == false));
    }

    #[tokio::test]
    async fn test_apply_with_every_executor_marks_ready() {
        let client = MockScopeClient::new();
        client.add_cluster(cluster("my-cluster"));
        let reconciler = every_operator(Reconciler::new(Arc::new(client.clone()), settings()));

        reconciler
            .reconcile_azure_cluster(Arc::new(azure_cluster("my-cluster", Some("my-cluster"))))
            .await
            .unwrap();

        let patches = client.patches();
        let spec_patch = patches.iter().find(|p| !p.status).unwrap();
        let endpoint = &spec_patch.patch["spec"]["controlPlaneEndpoint"];
        assert_eq!(endpoint["port"], 6443);
        assert!(
            endpoint["host"]
                .as_str()
                .unwrap()
                .ends_with(".westus2.cloudapp.azure.com")
        );
        let annotations = &spec_patch.patch["metadata"]["annotations"];
        assert!(annotations.get("sigs.k8s.io/azure-security-rules").is_some());

        let status_patch = patches.iter().find(|p| p.status).unwrap();
        assert_eq!(status_patch.patch["status"]["ready"], true);
    }

    #[tokio::test]
    async fn test_complete_apply_records_resource_group_tags() {
        let client = MockScopeClient::new();
        client.add_cluster(cluster("my-cluster"));
        let mut ac = azure_cluster("my-cluster", Some("my-cluster"));
        ac.spec.additional_tags = [("env".to_string(), "prod".to_string())].into();
        let tags = RecordingOperator::done("tags");
        let reconciler = every_operator(Reconciler::new(Arc::new(client.clone()), settings())).with_operator(tags.clone());

        reconciler.reconcile_azure_cluster(Arc::new(ac)).await.unwrap();

        assert_eq!(tags.calls(), vec!["create /subscriptions/123/resourceGroups/my-rg"]);
        let spec_patch = client.patches().into_iter().find(|p| !p.status).unwrap();
        let recorded = &spec_patch.patch["metadata"]["annotations"][RESOURCE_GROUP_TAGS_LAST_APPLIED_ANNOTATION];
        assert_eq!(recorded, r#"{"env":"prod"}"#);
    }

    #[tokio::test]
    async fn test_in_progress_operation_is_polled() {
        let client = MockScopeClient::new();
        client.add_cluster(cluster("my-cluster"));
        let reconciler =
            Reconciler::new(Arc::new(client.clone()), settings()).with_operator(RecordingOperator::in_progress("group"));

        let action = reconciler
            .reconcile_azure_cluster(Arc::new(azure_cluster("my-cluster", Some("my-cluster"))))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(OPERATION_POLL_INTERVAL));

        let status_patch = client.patches().into_iter().find(|p| p.status).unwrap();
        let futures = status_patch.patch["status"]["longRunningOperationStates"].as_array().unwrap();
        assert_eq!(futures[0]["serviceName"], "group");
        assert_eq!(futures[0]["data"], "create-token");
    }

    #[tokio::test]
    async fn test_failed_operation_is_returned_after_close() {
        let client = MockScopeClient::new();
        client.add_cluster(cluster("my-cluster"));
        let reconciler =
            Reconciler::new(Arc::new(client.clone()), settings()).with_operator(RecordingOperator::failing("group"));

        let err = reconciler
            .reconcile_azure_cluster(Arc::new(azure_cluster("my-cluster", Some("my-cluster"))))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Operation(_)));
        assert!(client.patches().iter().any(|p| p.status));
    }

    #[tokio::test]
    async fn test_delete_releases_finalizer_once_everything_is_gone() {
        let client = MockScopeClient::new();
        client.add_cluster(cluster("my-cluster"));
        let mut ac = azure_cluster("my-cluster", Some("my-cluster"));
        ac.set_defaults("my-cluster");
        ac.metadata.finalizers = Some(vec![AZURE_CLUSTER_FINALIZER.to_string()]);
        ac.metadata.deletion_timestamp = Some(serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap());
        let reconciler = every_operator(Reconciler::new(Arc::new(client.clone()), settings()));

        let action = reconciler.reconcile_azure_cluster(Arc::new(ac)).await.unwrap();
        assert_eq!(action, Action::await_change());

        let spec_patch = client.patches().into_iter().find(|p| !p.status).unwrap();
        assert_eq!(spec_patch.patch["metadata"]["finalizers"], serde_json::json!([]));
    }
}
