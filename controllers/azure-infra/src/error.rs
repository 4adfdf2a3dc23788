//! Controller-specific error types.
//!
//! Scope and credential failures arrive wrapped in [`ScopeError`]; this
//! module only adds what the binary itself can get wrong.

use azure_scope::{OperationError, ScopeError};
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Azure infrastructure controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Scope construction, derivation or close failed
    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),

    /// An Azure operation failed terminally
    #[error("Azure operation failed: {0}")]
    Operation(#[from] OperationError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Credentials could not be resolved for the object being reconciled
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ControllerError::Scope(ScopeError::Credentials(_)))
    }
}
