//! Main controller implementation.
//!
//! The `Controller` spawns one watcher per reconciled kind and runs until
//! the first of them stops:
//! - AzureCluster
//! - AzureManagedControlPlane
//! - AzureMachinePool
//! - AzureManagedMachinePool
//! - AzureMachinePoolMachine

use std::sync::Arc;

use kube::Client;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;

/// Runtime settings read at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Concurrent reconciles per watched kind
    pub concurrency: u16,
}

/// Main controller for the Azure infrastructure kinds.
pub struct Controller {
    azure_cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    managed_control_plane_watcher: JoinHandle<Result<(), ControllerError>>,
    machine_pool_watcher: JoinHandle<Result<(), ControllerError>>,
    managed_machine_pool_watcher: JoinHandle<Result<(), ControllerError>>,
    machine_pool_machine_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Spawn the watchers.
    pub fn new(client: Client, reconciler: Reconciler, settings: ControllerSettings) -> Self {
        info!(
            namespace = settings.namespace.as_deref().unwrap_or("all namespaces"),
            concurrency = settings.concurrency,
            "initializing Azure infrastructure controller"
        );
        let watcher = Arc::new(Watcher::new(
            client,
            Arc::new(reconciler),
            settings.namespace,
            settings.concurrency,
        ));

        let azure_cluster_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_azure_clusters().await })
        };
        let managed_control_plane_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_managed_control_planes().await })
        };
        let machine_pool_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_azure_machine_pools().await })
        };
        let managed_machine_pool_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_managed_machine_pools().await })
        };
        let machine_pool_machine_watcher = tokio::spawn(async move { watcher.watch_machine_pool_machines().await });

        Self {
            azure_cluster_watcher,
            managed_control_plane_watcher,
            machine_pool_watcher,
            managed_machine_pool_watcher,
            machine_pool_machine_watcher,
        }
    }

    /// Runs the controller until a watcher exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Azure infrastructure controller running");

        tokio::select! {
            result = &mut self.azure_cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("AzureCluster watcher panicked: {e}")))??;
            }
            result = &mut self.managed_control_plane_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("AzureManagedControlPlane watcher panicked: {e}")))??;
            }
            result = &mut self.machine_pool_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("AzureMachinePool watcher panicked: {e}")))??;
            }
            result = &mut self.managed_machine_pool_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("AzureManagedMachinePool watcher panicked: {e}")))??;
            }
            result = &mut self.machine_pool_machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("AzureMachinePoolMachine watcher panicked: {e}")))??;
            }
        }

        Ok(())
    }
}
