//! Scope errors

use azure_credentials::CredentialsError;
use crds::futures::Future;
use thiserror::Error;

/// Errors raised while building or closing a scope, or deriving specs
#[derive(Debug, Error)]
pub enum ScopeError {
    /// Required input is absent or malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Credentials could not be resolved
    #[error("credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Managed cluster declares no System agent pool
    #[error("failed to find an AzureManagedMachinePool with mode System, at least one system pool is required")]
    NoSystemPool,

    /// Agent pool version is newer than the control plane
    #[error("agent pool {pool} version {pool_version} is greater than control plane version {control_plane_version}")]
    PoolVersionExceedsControlPlane {
        /// Agent pool name
        pool: String,
        /// Agent pool Kubernetes version
        pool_version: String,
        /// Control plane Kubernetes version
        control_plane_version: String,
    },

    /// DNS service IP is not inside the service CIDR
    #[error("DNS service IP {dns_service_ip} is not inside service CIDR {service_cidr:?}")]
    DnsServiceIpOutsideServiceCidr {
        /// Configured DNS service IP
        dns_service_ip: String,
        /// Configured service CIDR
        service_cidr: Option<String>,
    },

    /// Node drain did not finish within the pool's drain timeout
    #[error("draining node {node} did not finish within {seconds}s")]
    DrainTimeout {
        /// Node being drained
        node: String,
        /// Configured timeout
        seconds: i64,
    },

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object changed since the scope snapshot was taken
    #[error("conflict patching {kind} {name}: object was modified")]
    Conflict {
        /// Object kind
        kind: String,
        /// Object name
        name: String,
    },
}

impl ScopeError {
    /// Conflicts are retried by the outer reconciler
    pub fn is_conflict(&self) -> bool {
        matches!(self, ScopeError::Conflict { .. })
    }
}

/// Outcome of a failed or unfinished Azure operation
#[derive(Debug, Error)]
pub enum OperationError {
    /// The operation is still running; the future is kept
    #[error("operation {} for {} {} is not done", .0.type_, .0.service_name, .0.name)]
    NotDone(Future),

    /// The operation failed terminally
    #[error("{service} {name}: {message}")]
    Failed {
        /// Service that ran the operation
        service: String,
        /// Resource name
        name: String,
        /// Error reported by Azure
        message: String,
    },
}

impl OperationError {
    /// Transient, poll again on the next pass
    pub fn is_operation_not_done(&self) -> bool {
        matches!(self, OperationError::NotDone(_))
    }
}
