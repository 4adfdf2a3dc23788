//! Identity variants and the authorizer built from them

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::environment::CloudEnvironment;
use crate::error::CredentialsError;
use crate::federated::FederatedTokenSource;
use crate::settings::EnvSettings;

/// How a principal proves its identity
#[derive(Clone)]
pub enum Identity {
    /// Client ID plus client secret
    ClientSecret {
        /// Client secret
        secret: String,
    },
    /// Client certificate
    ClientCertificate {
        /// Where the PFX/PEM bundle comes from
        source: CertificateSource,
        /// Certificate password
        password: String,
    },
    /// Resource owner password credentials
    UsernamePassword {
        /// Username
        username: String,
        /// Password
        password: String,
    },
    /// Projected federated token exchanged for an access token
    FederatedToken(Arc<FederatedTokenSource>),
}

impl Identity {
    /// Pick the identity from settings.
    ///
    /// Priority: client secret, then certificate, then username/password,
    /// then federated token file.
    pub fn from_settings(settings: &EnvSettings) -> Result<Self, CredentialsError> {
        if !settings.client_secret.is_empty() {
            return Ok(Identity::ClientSecret {
                secret: settings.client_secret.clone(),
            });
        }
        if !settings.certificate_path.is_empty() {
            return Ok(Identity::ClientCertificate {
                source: CertificateSource::File(PathBuf::from(&settings.certificate_path)),
                password: settings.certificate_password.clone(),
            });
        }
        if !settings.username.is_empty() && !settings.password.is_empty() {
            return Ok(Identity::UsernamePassword {
                username: settings.username.clone(),
                password: settings.password.clone(),
            });
        }
        if !settings.federated_token_file.is_empty() {
            return Ok(Identity::FederatedToken(Arc::new(FederatedTokenSource::new(
                settings.federated_token_file.clone(),
            ))));
        }
        Err(CredentialsError::Missing(
            "no client secret, certificate, username/password or federated token file configured".to_string(),
        ))
    }

    /// Short name of the variant, safe to log
    pub fn kind(&self) -> &'static str {
        match self {
            Identity::ClientSecret { .. } => "client-secret",
            Identity::ClientCertificate { .. } => "client-certificate",
            Identity::UsernamePassword { .. } => "username-password",
            Identity::FederatedToken(_) => "federated-token",
        }
    }
}

/// Origin of a client certificate
#[derive(Clone)]
pub enum CertificateSource {
    /// Bundle on disk
    File(PathBuf),
    /// Bundle bytes, e.g. read from a Secret
    Inline(Vec<u8>),
}

impl fmt::Debug for CertificateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateSource::File(path) => f.debug_tuple("File").field(path).finish(),
            CertificateSource::Inline(data) => write!(f, "Inline({} bytes)", data.len()),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::ClientCertificate { source, .. } => {
                f.debug_struct("ClientCertificate").field("source", source).finish_non_exhaustive()
            }
            Identity::UsernamePassword { username, .. } => {
                f.debug_struct("UsernamePassword").field("username", username).finish_non_exhaustive()
            }
            Identity::FederatedToken(source) => f.debug_tuple("FederatedToken").field(&source.path()).finish(),
            Identity::ClientSecret { .. } => f.write_str("ClientSecret { .. }"),
        }
    }
}

/// Everything needed to request Azure AD tokens for one principal.
///
/// Immutable once built; scopes with the same hash key share one through an `Arc`.
#[derive(Debug, Clone)]
pub struct Authorizer {
    /// Azure AD tenant
    pub tenant_id: String,
    /// Application (client) ID
    pub client_id: String,
    /// Cloud the tokens are issued for
    pub environment: CloudEnvironment,
    /// Token audience
    pub resource: String,
    /// Authority host
    pub authority_host: String,
    /// Extra tenants for cross-tenant calls
    pub auxiliary_tenant_ids: Vec<String>,
    /// Proof of identity
    pub identity: Identity,
}

impl Authorizer {
    /// Build an authorizer, applying the audience and authority overrides from settings
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        environment: CloudEnvironment,
        identity: Identity,
        settings: &EnvSettings,
    ) -> Result<Self, CredentialsError> {
        let tenant_id = tenant_id.into();
        let client_id = client_id.into();
        if tenant_id.is_empty() {
            return Err(CredentialsError::Missing("tenant ID".to_string()));
        }
        if client_id.is_empty() {
            return Err(CredentialsError::Missing("client ID".to_string()));
        }

        let resource = if settings.ad_resource.is_empty() {
            environment.resource_manager_endpoint().to_string()
        } else {
            settings.ad_resource.clone()
        };
        let authority_host = if settings.authority_host.is_empty() {
            environment.active_directory_endpoint().to_string()
        } else {
            settings.authority_host.clone()
        };

        Ok(Self {
            tenant_id,
            client_id,
            environment,
            resource,
            authority_host,
            auxiliary_tenant_ids: settings.auxiliary_tenant_ids.clone(),
            identity,
        })
    }

    /// Client assertion for federated identities (re-read at most every five minutes)
    pub async fn client_assertion(&self) -> Result<Option<String>, CredentialsError> {
        match &self.identity {
            Identity::FederatedToken(source) => source.token().await.map(Some),
            _ => Ok(None),
        }
    }
}
