//! Credential settings read from the process environment
//!
//! Every known `AZURE_*` key maps to one field. Values are read once when a
//! credential context is built; trailing newlines are stripped because
//! secrets mounted from files usually end with one.

/// `AZURE_TENANT_ID`
pub const TENANT_ID: &str = "AZURE_TENANT_ID";
/// `AZURE_CLIENT_ID`
pub const CLIENT_ID: &str = "AZURE_CLIENT_ID";
/// `AZURE_CLIENT_SECRET`
pub const CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
/// `AZURE_SUBSCRIPTION_ID`
pub const SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
/// `AZURE_CERTIFICATE_PATH`
pub const CERTIFICATE_PATH: &str = "AZURE_CERTIFICATE_PATH";
/// `AZURE_CERTIFICATE_PASSWORD`
pub const CERTIFICATE_PASSWORD: &str = "AZURE_CERTIFICATE_PASSWORD";
/// `AZURE_USERNAME`
pub const USERNAME: &str = "AZURE_USERNAME";
/// `AZURE_PASSWORD`
pub const PASSWORD: &str = "AZURE_PASSWORD";
/// `AZURE_ENVIRONMENT`
pub const ENVIRONMENT_NAME: &str = "AZURE_ENVIRONMENT";
/// `AZURE_AD_RESOURCE`
pub const AD_RESOURCE: &str = "AZURE_AD_RESOURCE";
/// `AZURE_AUXILIARY_TENANT_IDS`
pub const AUXILIARY_TENANT_IDS: &str = "AZURE_AUXILIARY_TENANT_IDS";
/// `AZURE_FEDERATED_TOKEN_FILE`
pub const FEDERATED_TOKEN_FILE: &str = "AZURE_FEDERATED_TOKEN_FILE";
/// `AZURE_AUTHORITY_HOST`
pub const AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";

/// Strip trailing CR/LF characters
pub fn trim_newlines(value: &str) -> &str {
    value.trim_end_matches(['\n', '\r'])
}

/// Azure settings from the environment
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvSettings {
    /// Azure AD tenant
    pub tenant_id: String,
    /// Application (client) ID
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Subscription
    pub subscription_id: String,
    /// Client certificate path
    pub certificate_path: String,
    /// Client certificate password
    pub certificate_password: String,
    /// Username for username/password auth
    pub username: String,
    /// Password for username/password auth
    pub password: String,
    /// Cloud environment name
    pub environment_name: String,
    /// Token audience override
    pub ad_resource: String,
    /// Extra tenants for cross-tenant calls
    pub auxiliary_tenant_ids: Vec<String>,
    /// Projected service account token file
    pub federated_token_file: String,
    /// Active Directory authority override
    pub authority_host: String,
}

impl EnvSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| trim_newlines(&v).to_string()).unwrap_or_default();

        let auxiliary_tenant_ids = get(AUXILIARY_TENANT_IDS)
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            tenant_id: get(TENANT_ID),
            client_id: get(CLIENT_ID),
            client_secret: get(CLIENT_SECRET),
            subscription_id: get(SUBSCRIPTION_ID),
            certificate_path: get(CERTIFICATE_PATH),
            certificate_password: get(CERTIFICATE_PASSWORD),
            username: get(USERNAME),
            password: get(PASSWORD),
            environment_name: get(ENVIRONMENT_NAME),
            ad_resource: get(AD_RESOURCE),
            auxiliary_tenant_ids,
            federated_token_file: get(FEDERATED_TOKEN_FILE),
            authority_host: get(AUTHORITY_HOST),
        }
    }
}

impl std::fmt::Debug for EnvSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvSettings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("subscription_id", &self.subscription_id)
            .field("environment_name", &self.environment_name)
            .field("certificate_path", &self.certificate_path)
            .field("federated_token_file", &self.federated_token_file)
            .finish_non_exhaustive()
    }
}
