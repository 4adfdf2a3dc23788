//! Credentials from an AzureClusterIdentity
//!
//! The identity object names the tenant, client and identity type; the
//! secret material lives in the Secret it references.

use std::sync::Arc;

use azure_credentials::settings::trim_newlines;
use azure_credentials::{
    Authorizer, CertificateSource, CloudEnvironment, CredentialsError, CredentialsProvider, EnvSettings,
    FederatedTokenSource, Identity, DEFAULT_FEDERATED_TOKEN_PATH,
};
use crds::azure_cluster_identity::{AzureClusterIdentity, IdentityType, CERTIFICATE_PASSWORD_KEY, CLIENT_SECRET_KEY};
use crds::references::IdentityReference;
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use crate::error::ScopeError;
use crate::scope_trait::ScopeClient;

fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| v.as_bytes().to_vec())
        })
}

fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    secret_value(secret, key).map(|v| trim_newlines(&String::from_utf8_lossy(&v)).to_string())
}

/// Provider backed by an AzureClusterIdentity and its secret
#[derive(Clone)]
pub struct IdentityCredentialsProvider {
    identity: AzureClusterIdentity,
    tenant_id: String,
    client_id: String,
    secret: Option<Secret>,
}

impl IdentityCredentialsProvider {
    /// Fetch the identity referenced from an object in `namespace`, and its secret
    pub async fn load(
        client: &dyn ScopeClient,
        identity_ref: &IdentityReference,
        namespace: &str,
    ) -> Result<Self, ScopeError> {
        let identity_namespace = identity_ref.namespace.as_deref().unwrap_or(namespace);
        let identity = client
            .get_cluster_identity(identity_namespace, &identity_ref.name)
            .await?
            .ok_or_else(|| {
                ScopeError::InvalidInput(format!(
                    "AzureClusterIdentity {}/{} not found",
                    identity_namespace, identity_ref.name
                ))
            })?;

        if !identity.is_allowed_namespace(namespace) {
            return Err(ScopeError::InvalidInput(format!(
                "AzureClusterIdentity {}/{} does not allow namespace {}",
                identity_namespace, identity_ref.name, namespace
            )));
        }

        let secret = match (&identity.spec.type_, &identity.spec.client_secret) {
            (IdentityType::WorkloadIdentity, _) => None,
            (_, Some(secret_ref)) => {
                let secret_namespace = secret_ref.namespace.as_deref().unwrap_or(identity_namespace);
                let secret = client
                    .get_secret(secret_namespace, &secret_ref.name)
                    .await?
                    .ok_or_else(|| {
                        CredentialsError::Missing(format!("secret {}/{}", secret_namespace, secret_ref.name))
                    })?;
                Some(secret)
            }
            (_, None) => {
                return Err(CredentialsError::Missing(format!(
                    "clientSecret reference on AzureClusterIdentity {}",
                    identity_ref.name
                ))
                .into());
            }
        };

        debug!(
            identity = %identity_ref.name,
            namespace = identity_namespace,
            type_ = ?identity.spec.type_,
            "loaded cluster identity"
        );
        Ok(Self {
            tenant_id: trim_newlines(&identity.spec.tenant_id).to_string(),
            client_id: trim_newlines(&identity.spec.client_id).to_string(),
            identity,
            secret,
        })
    }

    /// Identity type of the referenced object
    pub fn identity_type(&self) -> IdentityType {
        self.identity.spec.type_
    }

    fn build_identity(&self, settings: &EnvSettings) -> Result<Identity, CredentialsError> {
        let secret = || {
            self.secret
                .as_ref()
                .ok_or_else(|| CredentialsError::Missing("identity secret".to_string()))
        };
        match self.identity.spec.type_ {
            IdentityType::ServicePrincipal | IdentityType::ManualServicePrincipal => {
                let value = secret_string(secret()?, CLIENT_SECRET_KEY)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| CredentialsError::Missing(format!("{CLIENT_SECRET_KEY} in identity secret")))?;
                Ok(Identity::ClientSecret { secret: value })
            }
            IdentityType::ServicePrincipalCertificate => {
                let secret = secret()?;
                let certificate = secret_value(secret, CLIENT_SECRET_KEY)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| CredentialsError::Missing(format!("{CLIENT_SECRET_KEY} in identity secret")))?;
                Ok(Identity::ClientCertificate {
                    source: CertificateSource::Inline(certificate),
                    password: secret_string(secret, CERTIFICATE_PASSWORD_KEY).unwrap_or_default(),
                })
            }
            IdentityType::WorkloadIdentity => {
                let path = if settings.federated_token_file.is_empty() {
                    DEFAULT_FEDERATED_TOKEN_PATH
                } else {
                    settings.federated_token_file.as_str()
                };
                Ok(Identity::FederatedToken(Arc::new(FederatedTokenSource::new(path))))
            }
        }
    }
}

#[async_trait::async_trait]
impl CredentialsProvider for IdentityCredentialsProvider {
    async fn get_authorizer(
        &self,
        environment: CloudEnvironment,
        settings: &EnvSettings,
    ) -> Result<Authorizer, CredentialsError> {
        let identity = self.build_identity(settings)?;
        Authorizer::new(
            self.tenant_id.clone(),
            self.client_id.clone(),
            environment,
            identity,
            settings,
        )
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockScopeClient;
    use azure_credentials::AzureClients;
    use crds::azure_cluster_identity::{AllowedNamespaces, AzureClusterIdentitySpec};
    use crds::references::SecretReference;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn identity(type_: IdentityType, allowed: Option<AllowedNamespaces>) -> AzureClusterIdentity {
        let mut id = AzureClusterIdentity::new(
            "cluster-identity",
            AzureClusterIdentitySpec {
                type_,
                tenant_id: "tenant\n".to_string(),
                client_id: "client".to_string(),
                client_secret: Some(SecretReference {
                    name: "identity-secret".to_string(),
                    namespace: None,
                }),
                allowed_namespaces: allowed,
            },
        );
        id.metadata.namespace = Some("capz-system".to_string());
        id
    }

    fn secret(entries: &[(&str, &[u8])]) -> Secret {
        let mut secret = Secret::default();
        secret.metadata.name = Some("identity-secret".to_string());
        secret.metadata.namespace = Some("capz-system".to_string());
        secret.data = Some(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                .collect::<BTreeMap<_, _>>(),
        );
        secret
    }

    fn reference() -> IdentityReference {
        IdentityReference {
            name: "cluster-identity".to_string(),
            namespace: Some("capz-system".to_string()),
        }
    }

    fn all_namespaces() -> Option<AllowedNamespaces> {
        Some(AllowedNamespaces { list: vec![], all: true })
    }

    #[tokio::test]
    async fn test_service_principal_from_secret() {
        let client = MockScopeClient::new();
        client.add_cluster_identity(identity(IdentityType::ServicePrincipal, all_namespaces()));
        client.add_secret(secret(&[(CLIENT_SECRET_KEY, b"s3cret\n")]));

        let provider = IdentityCredentialsProvider::load(&client, &reference(), "default").await.unwrap();
        assert_eq!(provider.tenant_id(), "tenant");

        let mut clients = AzureClients::new(EnvSettings::default());
        clients
            .set_credentials_with_provider("sub", "", &provider)
            .await
            .unwrap();
        let authorizer = clients.authorizer().unwrap();
        match &authorizer.identity {
            Identity::ClientSecret { secret } => assert_eq!(secret, "s3cret"),
            other => panic!("unexpected identity {other:?}"),
        }
        assert_eq!(clients.tenant_id(), "tenant");
        assert_eq!(clients.subscription_id(), "sub");
    }

    #[tokio::test]
    async fn test_certificate_identity_keeps_bytes() {
        let client = MockScopeClient::new();
        client.add_cluster_identity(identity(IdentityType::ServicePrincipalCertificate, all_namespaces()));
        client.add_secret(secret(&[(CLIENT_SECRET_KEY, b"PEM DATA"), (CERTIFICATE_PASSWORD_KEY, b"pw")]));

        let provider = IdentityCredentialsProvider::load(&client, &reference(), "default").await.unwrap();
        let authorizer = provider
            .get_authorizer(CloudEnvironment::Public, &EnvSettings::default())
            .await
            .unwrap();
        match authorizer.identity {
            Identity::ClientCertificate {
                source: CertificateSource::Inline(bytes),
                password,
            } => {
                assert_eq!(bytes, b"PEM DATA".to_vec());
                assert_eq!(password, "pw");
            }
            other => panic!("unexpected identity {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_workload_identity_uses_default_token_path() {
        let client = MockScopeClient::new();
        client.add_cluster_identity(identity(IdentityType::WorkloadIdentity, all_namespaces()));

        let provider = IdentityCredentialsProvider::load(&client, &reference(), "default").await.unwrap();
        let authorizer = provider
            .get_authorizer(CloudEnvironment::Public, &EnvSettings::default())
            .await
            .unwrap();
        match authorizer.identity {
            Identity::FederatedToken(source) => {
                assert_eq!(source.path(), std::path::Path::new(DEFAULT_FEDERATED_TOKEN_PATH))
            }
            other => panic!("unexpected identity {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_namespace_not_allowed() {
        let client = MockScopeClient::new();
        client.add_cluster_identity(identity(IdentityType::ServicePrincipal, None));

        let err = IdentityCredentialsProvider::load(&client, &reference(), "team-a")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ScopeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_secret_is_credentials_error() {
        let client = MockScopeClient::new();
        client.add_cluster_identity(identity(IdentityType::ServicePrincipal, all_namespaces()));

        let err = IdentityCredentialsProvider::load(&client, &reference(), "default")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ScopeError::Credentials(CredentialsError::Missing(_))));
    }
}
