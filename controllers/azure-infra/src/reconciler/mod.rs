//! Reconciliation logic for the Azure infrastructure objects.
//!
//! One submodule per watched kind:
//! - `cluster`: AzureCluster (self-managed control plane network)
//! - `managed_control_plane`: AzureManagedControlPlane (AKS)
//! - `machine_pool`: AzureMachinePool (scale set and its machine records)
//! - `managed_machine_pool`: AzureManagedMachinePool (AKS agent pool)
//! - `machine_pool_machine`: AzureMachinePoolMachine (node binding and drain)
//!
//! Every pass builds a fresh scope, drives the derived resource families
//! through the registered executors and closes the scope. Nothing survives
//! between passes except what the scope patched onto the object.

pub mod cluster;
pub mod machine_pool;
pub mod machine_pool_machine;
pub mod managed_control_plane;
pub mod managed_machine_pool;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use azure_credentials::{AuthorizerCache, AzureClients, EnvSettings};
use azure_scope::async_ops::{ResourceOperator, delete_all, reconcile_all};
use azure_scope::{
    ClusterScope, ClusterScopeParams, InfraClusterScope, ManagedControlPlaneScope, ManagedControlPlaneScopeParams,
    ObjectKind, OperationError, ResourceSpec, ScaleSetState, ScopeClient, ScopeError, ServiceSpecs,
};
use crds::Cluster;
use crds::cluster_api::CLUSTER_API_GROUP;
use crds::conditions::Conditioned;
use crds::futures::LongRunningOperations;
use kube::api::ObjectMeta;
use tracing::{debug, warn};

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::reconcile_helpers::{auth_failed_status_patch, owner_name};

/// API group of the Azure infrastructure kinds
pub(crate) const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// Whether a pass creates or tears down resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Apply,
    Delete,
}

/// Reconciles the Azure infrastructure objects.
pub struct Reconciler {
    pub(crate) client: Arc<dyn ScopeClient>,
    settings: EnvSettings,
    /// Cloud executors keyed by service name
    operators: HashMap<String, Arc<dyn ResourceOperator>>,
    /// Authorizers shared by every pass with the same credential hash key
    authorizers: Arc<AuthorizerCache>,
    /// Requeue backoff per object (namespace/name)
    backoff_states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("operators", &self.operators.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(client: Arc<dyn ScopeClient>, settings: EnvSettings) -> Self {
        Self {
            client,
            settings,
            operators: HashMap::new(),
            authorizers: Arc::new(AuthorizerCache::new()),
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Register the executor for one service; replaces any earlier one
    #[must_use]
    pub fn with_operator(mut self, operator: Arc<dyn ResourceOperator>) -> Self {
        self.operators.insert(operator.service_name().to_string(), operator);
        self
    }

    /// Fresh credential context for one pass
    pub(crate) fn azure_clients(&self) -> AzureClients {
        AzureClients::new(self.settings.clone()).with_cache(Arc::clone(&self.authorizers))
    }

    /// Delay before retrying an object whose last pass failed
    pub fn error_backoff(&self, key: &str) -> Duration {
        let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
        states.entry(key.to_string()).or_default().next_delay()
    }

    /// Forget the failure streak of an object
    pub fn reset_backoff(&self, key: &str) {
        let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
        states.remove(key);
    }

    /// Cluster API Cluster owning `meta`, if the owner ref is set and the Cluster exists
    pub(crate) async fn owner_cluster(&self, meta: &ObjectMeta) -> Result<Option<Cluster>, ControllerError> {
        let Some(name) = owner_name(meta, "Cluster", CLUSTER_API_GROUP) else {
            return Ok(None);
        };
        let namespace = meta.namespace.as_deref().unwrap_or_default();
        Ok(self.client.get_cluster(namespace, &name).await?)
    }

    /// Scope over the infrastructure object the Cluster points at
    pub(crate) async fn infra_cluster_scope(&self, cluster: Cluster) -> Result<Option<InfraClusterScope>, ScopeError> {
        let Some(infra_ref) = cluster.spec.infrastructure_ref.clone() else {
            return Ok(None);
        };
        let namespace = cluster.metadata.namespace.clone().unwrap_or_default();

        if infra_ref.kind.as_deref() == Some("AzureManagedControlPlane") {
            let Some(control_plane) = self.client.get_managed_control_plane(&namespace, &infra_ref.name).await? else {
                return Ok(None);
            };
            let scope = ManagedControlPlaneScope::new(ManagedControlPlaneScopeParams {
                client: self.client.clone(),
                azure_clients: self.azure_clients(),
                cluster,
                control_plane,
            })
            .await?;
            return Ok(Some(InfraClusterScope::Managed(scope)));
        }

        let Some(azure_cluster) = self.client.get_azure_cluster(&namespace, &infra_ref.name).await? else {
            return Ok(None);
        };
        let scope = ClusterScope::new(ClusterScopeParams {
            client: self.client.clone(),
            azure_clients: self.azure_clients(),
            cluster,
            azure_cluster,
        })
        .await?;
        Ok(Some(InfraClusterScope::Cluster(scope)))
    }

    /// Scale set behind `spec` as its executor observes it; `None` without an executor
    pub(crate) async fn observe_scale_set(&self, spec: &ResourceSpec) -> Result<Option<ScaleSetState>, OperationError> {
        match self.operators.get(spec.service_name()) {
            Some(operator) => operator.observed_scale_set(spec).await,
            None => Ok(None),
        }
    }

    /// Drive every family through its executor.
    ///
    /// Families without a registered executor are skipped and reported as
    /// `false` in the returned completeness flag. Deletion walks the families
    /// in reverse creation order.
    pub(crate) async fn drive<T>(
        &self,
        obj: &mut T,
        families: &[ServiceSpecs],
        direction: Direction,
    ) -> (Vec<Result<(), OperationError>>, bool)
    where
        T: Conditioned + LongRunningOperations + Send,
    {
        let ordered: Vec<&ServiceSpecs> = match direction {
            Direction::Apply => families.iter().collect(),
            Direction::Delete => families.iter().rev().collect(),
        };

        let mut outcomes = Vec::with_capacity(ordered.len());
        let mut complete = true;
        for family in ordered {
            let Some(service) = family.specs.first().map(|s| s.service_name()) else {
                continue;
            };
            let Some(operator) = self.operators.get(service) else {
                debug!(service, condition = family.condition, "no executor registered, skipping");
                complete = false;
                continue;
            };
            let outcome = match direction {
                Direction::Apply => reconcile_all(obj, operator.as_ref(), &family.specs, family.condition).await,
                Direction::Delete => delete_all(obj, operator.as_ref(), &family.specs, family.condition).await,
            };
            outcomes.push(outcome);
        }
        let complete = complete && outcomes.iter().all(Result::is_ok);
        (outcomes, complete)
    }

    /// Record a scope construction failure on the object and hand it back.
    ///
    /// Credential failures mark `Ready` False with reason `AuthFailed`; other
    /// failures are only returned.
    pub(crate) async fn report_scope_failure<K>(&self, kind: ObjectKind, mut obj: K, err: ScopeError) -> ControllerError
    where
        K: Conditioned + kube::Resource,
    {
        let err = ControllerError::Scope(err);
        if !err.is_auth_failure() {
            return err;
        }
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();
        warn!(kind = %kind, namespace = %namespace, name = %name, error = %err, "failed to resolve Azure credentials");
        let patch = auth_failed_status_patch(&mut obj, &err.to_string());
        if let Err(patch_err) = self.client.patch_object_status(kind, &namespace, &name, &patch).await {
            warn!(kind = %kind, name = %name, error = %patch_err, "failed to record AuthFailed condition");
        }
        err
    }
}

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use azure_scope::mock::MockScopeClient;
    use azure_scope::specs::{GroupSpec, PublicIpSpec};
    use crds::AzureCluster;
    use crds::conditions::{self, PUBLIC_IPS_READY, RESOURCE_GROUP_READY};

    fn families() -> Vec<ServiceSpecs> {
        vec![
            ServiceSpecs {
                condition: RESOURCE_GROUP_READY,
                specs: vec![
                    GroupSpec {
                        name: "my-rg".to_string(),
                        ..Default::default()
                    }
                    .into(),
                ],
            },
            ServiceSpecs {
                condition: PUBLIC_IPS_READY,
                specs: vec![
                    PublicIpSpec {
                        name: "pip-1".to_string(),
                        ..Default::default()
                    }
                    .into(),
                ],
            },
        ]
    }

    #[test]
    fn test_backoff_grows_per_object_and_resets() {
        let reconciler = Reconciler::new(Arc::new(MockScopeClient::new()), EnvSettings::default());
        assert_eq!(reconciler.error_backoff("default/a").as_secs(), 30);
        assert_eq!(reconciler.error_backoff("default/a").as_secs(), 30);
        assert_eq!(reconciler.error_backoff("default/a").as_secs(), 60);
        assert_eq!(reconciler.error_backoff("default/b").as_secs(), 30);

        reconciler.reset_backoff("default/a");
        assert_eq!(reconciler.error_backoff("default/a").as_secs(), 30);
    }

    #[test]
    fn test_passes_share_one_authorizer_per_credential_key() {
        let reconciler = Reconciler::new(Arc::new(MockScopeClient::new()), settings());
        let mut first = reconciler.azure_clients();
        first.set_credentials("123", "").unwrap();
        let mut second = reconciler.azure_clients();
        second.set_credentials("123", "").unwrap();

        assert!(Arc::ptr_eq(&first.authorizer().unwrap(), &second.authorizer().unwrap()));
        assert_eq!(reconciler.authorizers.len(), 1);
    }

    #[tokio::test]
    async fn test_drive_skips_families_without_executor() {
        let operator = RecordingOperator::done("group");
        let reconciler =
            Reconciler::new(Arc::new(MockScopeClient::new()), EnvSettings::default()).with_operator(operator.clone());
        let mut obj = AzureCluster::new("c1", Default::default());

        let (outcomes, complete) = reconciler.drive(&mut obj, &families(), Direction::Apply).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_ok());
        assert!(!complete);
        assert_eq!(operator.calls(), vec!["create my-rg"]);
        assert!(conditions::is_true(&obj, RESOURCE_GROUP_READY));
        assert!(conditions::get(&obj, PUBLIC_IPS_READY).is_none());
    }

    #[tokio::test]
    async fn test_drive_deletes_in_reverse_order() {
        let group = RecordingOperator::done("group");
        let ips = RecordingOperator::done("publicips");
        let log = SharedLog::default();
        group.share_log(&log);
        ips.share_log(&log);
        let reconciler = Reconciler::new(Arc::new(MockScopeClient::new()), EnvSettings::default())
            .with_operator(group)
            .with_operator(ips);
        let mut obj = AzureCluster::new("c1", Default::default());

        let (outcomes, complete) = reconciler.drive(&mut obj, &families(), Direction::Delete).await;
        assert_eq!(outcomes.len(), 2);
        assert!(complete);
        assert_eq!(log.entries(), vec!["delete pip-1", "delete my-rg"]);
    }
}
