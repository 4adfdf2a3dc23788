//! Pluggable credential sources
//!
//! Providers resolve an authorizer from somewhere other than the process
//! environment, for example an identity object plus its referenced secret.

use crate::environment::CloudEnvironment;
use crate::error::CredentialsError;
use crate::identity::Authorizer;
use crate::settings::EnvSettings;

/// Source of an authorizer
#[async_trait::async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Build an authorizer for `environment`; `settings` supplies audience and authority overrides
    async fn get_authorizer(
        &self,
        environment: CloudEnvironment,
        settings: &EnvSettings,
    ) -> Result<Authorizer, CredentialsError>;

    /// Client ID of the principal
    fn client_id(&self) -> &str;

    /// Tenant of the principal
    fn tenant_id(&self) -> &str;
}
