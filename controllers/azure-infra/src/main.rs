//! Azure Infrastructure Controller
//!
//! Reconciles the Cluster API Azure infrastructure kinds:
//! - AzureCluster: network, load balancers and DNS for a self-managed control plane
//! - AzureManagedControlPlane: managed cluster with its VNet and agent pools
//! - AzureMachinePool: scale set and one AzureMachinePoolMachine per instance
//! - AzureManagedMachinePool: one AKS agent pool
//! - AzureMachinePoolMachine: binds scale set instances to workload nodes and drains them
//!
//! Configuration comes from the environment:
//! - `WATCH_NAMESPACE`: namespace to watch (all namespaces when unset)
//! - `RECONCILE_CONCURRENCY`: concurrent reconciles per kind (default 3)
//! - `AZURE_*`: default credentials, see `azure_credentials::EnvSettings`
//! - `RUST_LOG`: log filter (default `info`)

mod backoff;
mod controller;
mod error;
mod reconcile_helpers;
mod reconciler;
mod watcher;

use std::env;
use std::sync::Arc;

use azure_credentials::EnvSettings;
use azure_scope::KubeScopeClient;
use controller::{Controller, ControllerSettings};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::ControllerError;
use crate::reconciler::Reconciler;

const DEFAULT_CONCURRENCY: u16 = 3;

/// Build the controller settings from raw environment values
fn parse_settings(namespace: Option<String>, concurrency: Option<String>) -> Result<ControllerSettings, ControllerError> {
    let namespace = namespace.filter(|ns| !ns.trim().is_empty());
    let concurrency = match concurrency.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_CONCURRENCY,
        Some(raw) => match raw.parse::<u16>() {
            Ok(n) if n > 0 => n,
            _ => {
                return Err(ControllerError::InvalidConfig(format!(
                    "RECONCILE_CONCURRENCY must be a positive integer, got {raw:?}"
                )));
            }
        },
    };
    Ok(ControllerSettings { namespace, concurrency })
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        return Err(ControllerError::InvalidConfig(
            "failed to install the rustls ring crypto provider".to_string(),
        ));
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Azure Infrastructure Controller");

    let settings = parse_settings(env::var("WATCH_NAMESPACE").ok(), env::var("RECONCILE_CONCURRENCY").ok())?;
    let azure_settings = EnvSettings::from_env();
    info!(
        namespace = settings.namespace.as_deref().unwrap_or("all namespaces"),
        subscription = %azure_settings.subscription_id,
        "configuration loaded"
    );

    let client = kube::Client::try_default().await?;
    let reconciler = Reconciler::new(Arc::new(KubeScopeClient::new(client.clone())), azure_settings);

    Controller::new(client, reconciler, settings).run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = parse_settings(None, None).unwrap();
        assert_eq!(settings.namespace, None);
        assert_eq!(settings.concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_blank_namespace_watches_everything() {
        let settings = parse_settings(Some("  ".to_string()), Some(String::new())).unwrap();
        assert_eq!(settings.namespace, None);
        assert_eq!(settings.concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_explicit_values() {
        let settings = parse_settings(Some("capz-system".to_string()), Some(" 8 ".to_string())).unwrap();
        assert_eq!(settings.namespace.as_deref(), Some("capz-system"));
        assert_eq!(settings.concurrency, 8);
    }

    #[test]
    fn test_invalid_concurrency_is_rejected() {
        for raw in ["0", "-1", "many"] {
            let err = parse_settings(None, Some(raw.to_string())).unwrap_err();
            assert!(matches!(err, ControllerError::InvalidConfig(_)), "{raw}");
        }
    }
}
