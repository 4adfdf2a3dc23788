//! Per-scope Azure credential context

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::AuthorizerCache;
use crate::environment::CloudEnvironment;
use crate::error::CredentialsError;
use crate::identity::{Authorizer, Identity};
use crate::provider::CredentialsProvider;
use crate::settings::EnvSettings;

/// Subscription, cloud and authorizer for one reconcile pass
#[derive(Debug, Clone)]
pub struct AzureClients {
    settings: EnvSettings,
    subscription_id: String,
    environment: CloudEnvironment,
    authorizer: Option<Arc<Authorizer>>,
    /// Shared across passes when set
    cache: Option<Arc<AuthorizerCache>>,
}

impl AzureClients {
    /// Context over the given settings; call one of the `set_credentials*` methods next
    pub fn new(settings: EnvSettings) -> Self {
        Self {
            settings,
            subscription_id: String::new(),
            environment: CloudEnvironment::Public,
            authorizer: None,
            cache: None,
        }
    }

    /// Context over the process environment
    pub fn from_env() -> Self {
        Self::new(EnvSettings::from_env())
    }

    /// Share resolved authorizers through `cache`
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<AuthorizerCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Resolve credentials from the environment settings
    pub fn set_credentials(&mut self, subscription_id: &str, environment_name: &str) -> Result<(), CredentialsError> {
        self.set_environment(subscription_id, environment_name)?;

        let identity = Identity::from_settings(&self.settings)?;
        let authorizer = Authorizer::new(
            self.settings.tenant_id.clone(),
            self.settings.client_id.clone(),
            self.environment,
            identity,
            &self.settings,
        )?;
        debug!(
            subscription = %self.subscription_id,
            environment = %self.environment,
            identity = authorizer.identity.kind(),
            "resolved credentials from environment"
        );
        self.store_authorizer(authorizer);
        Ok(())
    }

    /// Resolve credentials through a provider (e.g. an AzureClusterIdentity)
    pub async fn set_credentials_with_provider(
        &mut self,
        subscription_id: &str,
        environment_name: &str,
        provider: &dyn CredentialsProvider,
    ) -> Result<(), CredentialsError> {
        self.set_environment(subscription_id, environment_name)?;

        let authorizer = provider.get_authorizer(self.environment, &self.settings).await?;
        debug!(
            subscription = %self.subscription_id,
            environment = %self.environment,
            identity = authorizer.identity.kind(),
            "resolved credentials from provider"
        );
        self.store_authorizer(authorizer);
        Ok(())
    }

    fn store_authorizer(&mut self, authorizer: Authorizer) {
        let shared = match &self.cache {
            Some(cache) => {
                let key = hash_key(
                    &authorizer.tenant_id,
                    self.environment.name(),
                    &self.subscription_id,
                    &authorizer.client_id,
                );
                cache.share(key, authorizer)
            }
            None => Arc::new(authorizer),
        };
        self.authorizer = Some(shared);
    }

    fn set_environment(&mut self, subscription_id: &str, environment_name: &str) -> Result<(), CredentialsError> {
        let subscription_id = if subscription_id.is_empty() {
            self.settings.subscription_id.as_str()
        } else {
            subscription_id
        };
        if subscription_id.is_empty() {
            return Err(CredentialsError::Missing("subscription ID".to_string()));
        }
        let environment_name = if environment_name.is_empty() {
            self.settings.environment_name.as_str()
        } else {
            environment_name
        };

        self.environment = CloudEnvironment::from_name(environment_name)?;
        self.subscription_id = subscription_id.to_string();
        Ok(())
    }

    /// Subscription the context targets
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Resolved cloud
    pub fn cloud_environment(&self) -> CloudEnvironment {
        self.environment
    }

    /// Resource Manager endpoint of the resolved cloud
    pub fn resource_manager_endpoint(&self) -> &'static str {
        self.environment.resource_manager_endpoint()
    }

    /// DNS suffix for public IP FQDNs
    pub fn vm_dns_suffix(&self) -> &'static str {
        self.environment.vm_dns_suffix()
    }

    /// Shared authorizer; `None` until credentials were set
    pub fn authorizer(&self) -> Option<Arc<Authorizer>> {
        self.authorizer.clone()
    }

    /// Tenant of the resolved principal
    pub fn tenant_id(&self) -> &str {
        self.authorizer.as_ref().map_or("", |a| a.tenant_id.as_str())
    }

    /// Client ID of the resolved principal
    pub fn client_id(&self) -> &str {
        self.authorizer.as_ref().map_or("", |a| a.client_id.as_str())
    }

    /// Stable key for sharing cloud clients between scopes
    ///
    /// URL-safe base64 of SHA-256 over tenant, cloud, subscription and client.
    pub fn hash_key(&self) -> String {
        hash_key(self.tenant_id(), self.environment.name(), &self.subscription_id, self.client_id())
    }
}

/// URL-safe base64 SHA-256 of the concatenated identity fields
pub fn hash_key(tenant_id: &str, cloud: &str, subscription_id: &str, client_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(cloud.as_bytes());
    hasher.update(subscription_id.as_bytes());
    hasher.update(client_id.as_bytes());
    URL_SAFE.encode(hasher.finalize())
}
