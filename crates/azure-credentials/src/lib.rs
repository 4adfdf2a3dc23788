//! Azure credential context
//!
//! Resolves a subscription, cloud environment and identity into an
//! [`Authorizer`] for one reconcile pass.
//!
//! # Example
//!
//! ```no_run
//! use azure_credentials::AzureClients;
//!
//! # fn example() -> Result<(), azure_credentials::CredentialsError> {
//! let mut clients = AzureClients::from_env();
//! clients.set_credentials("", "AzurePublicCloud")?;
//! println!("cache key {}", clients.hash_key());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clients;
pub mod environment;
pub mod error;
pub mod federated;
pub mod identity;
pub mod provider;
pub mod settings;

pub use cache::AuthorizerCache;
pub use clients::AzureClients;
pub use environment::CloudEnvironment;
pub use error::CredentialsError;
pub use federated::{DEFAULT_FEDERATED_TOKEN_PATH, FederatedTokenSource};
pub use identity::{Authorizer, CertificateSource, Identity};
pub use provider::CredentialsProvider;
pub use settings::EnvSettings;
