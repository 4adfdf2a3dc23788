//! Kubernetes resource watchers.
//!
//! Every watched kind goes through the generic `watch_resource()` helper,
//! which runs a `kube_runtime::Controller` with debounce and bounded
//! concurrency. Failed passes are retried with a per-object Fibonacci backoff
//! held by the [`Reconciler`].

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crds::{
    AzureCluster, AzureMachinePool, AzureMachinePoolMachine, AzureManagedControlPlane, AzureManagedMachinePool,
};
use futures::StreamExt;
use kube::{Api, Client, Resource};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::error::ControllerError;
use crate::reconcile_helpers::object_key;
use crate::reconciler::Reconciler;

/// Quiet period after the last event before an object is reconciled
const DEBOUNCE: Duration = Duration::from_secs(5);

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Run a controller for `K` until its watch stream ends.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + Debug + DeserializeOwned + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone + Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!(kind = resource_name, concurrency, "starting watcher");

    let error_policy = move |obj: Arc<K>, err: &ControllerError, ctx: Arc<Reconciler>| {
        let key = object_key(obj.meta());
        let delay = ctx.error_backoff(&key);
        if err.is_auth_failure() {
            warn!(kind = resource_name, object = %key, error = %err, retry_in = ?delay, "credentials unavailable");
        } else {
            error!(kind = resource_name, object = %key, error = %err, retry_in = ?delay, "reconciliation failed");
        }
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = object_key(obj.meta());
            debug!(kind = resource_name, object = %key, "reconciling");
            let action = reconcile_fn(Arc::clone(&ctx), obj).await?;
            ctx.reset_backoff(&key);
            Ok(action)
        }
    };

    let config = ControllerConfig::default().debounce(DEBOUNCE).concurrency(concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(kind = resource_name, object = %obj.name, "reconciled"),
                Err(e) => debug!(kind = resource_name, error = %e, "controller event error"),
            }
        })
        .await;

    info!(kind = resource_name, "watcher stopped");
    Ok(())
}

/// Watches the Azure infrastructure kinds.
pub struct Watcher {
    client: Client,
    reconciler: Arc<Reconciler>,
    /// Namespace to watch; all namespaces when unset
    namespace: Option<String>,
    concurrency: u16,
}

impl Watcher {
    pub fn new(client: Client, reconciler: Arc<Reconciler>, namespace: Option<String>, concurrency: u16) -> Self {
        Self {
            client,
            reconciler,
            namespace,
            concurrency,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub async fn watch_azure_clusters(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.api::<AzureCluster>(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_azure_cluster(resource).await }),
            "AzureCluster",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_managed_control_planes(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.api::<AzureManagedControlPlane>(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_managed_control_plane(resource).await }),
            "AzureManagedControlPlane",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_azure_machine_pools(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.api::<AzureMachinePool>(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_azure_machine_pool(resource).await }),
            "AzureMachinePool",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_managed_machine_pools(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.api::<AzureManagedMachinePool>(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_managed_machine_pool(resource).await }),
            "AzureManagedMachinePool",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_machine_pool_machines(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.api::<AzureMachinePoolMachine>(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_machine_pool_machine(resource).await }),
            "AzureMachinePoolMachine",
            self.concurrency,
        )
        .await
    }
}
