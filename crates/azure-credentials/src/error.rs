//! Credential resolution errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving Azure credentials
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// A required credential field is absent
    #[error("credentials missing: {0}")]
    Missing(String),

    /// The requested cloud environment is unknown
    #[error("cloud environment not found: {0}")]
    EnvironmentNotFound(String),

    /// The federated token file could not be read
    #[error("failed to read federated token file {path}: {source}")]
    TokenFileUnreadable {
        /// Token file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A credential field has an unusable value
    #[error("invalid credentials input: {0}")]
    InvalidInput(String),
}
