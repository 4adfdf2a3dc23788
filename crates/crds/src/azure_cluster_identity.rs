//! AzureClusterIdentity CRD
//!
//! Describes the principal a cluster authenticates as. Secrets never live on
//! the object itself; `clientSecret` points at a Secret holding them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, Conditioned};
use crate::references::SecretReference;

/// Key of the client secret (or certificate) inside the referenced Secret
pub const CLIENT_SECRET_KEY: &str = "clientSecret";

/// Key of the certificate password inside the referenced Secret
pub const CERTIFICATE_PASSWORD_KEY: &str = "password";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureClusterIdentity",
    namespaced,
    status = "AzureClusterIdentityStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterIdentitySpec {
    /// How the identity authenticates
    #[serde(rename = "type")]
    pub type_: IdentityType,

    /// Azure AD tenant
    #[serde(rename = "tenantID")]
    pub tenant_id: String,

    /// Application (client) ID
    #[serde(rename = "clientID")]
    pub client_id: String,

    /// Secret holding the client secret or certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretReference>,

    /// Namespaces allowed to use the identity; empty allows only the identity's own namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_namespaces: Option<AllowedNamespaces>,
}

/// Identity types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum IdentityType {
    /// Client secret, rotated by the identity controller
    #[default]
    ServicePrincipal,
    /// Client secret managed by the user
    ManualServicePrincipal,
    /// Client certificate
    ServicePrincipalCertificate,
    /// Federated token projected into the pod
    WorkloadIdentity,
}

/// Namespaces allowed to reference an identity
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllowedNamespaces {
    /// Explicit namespace names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<String>,

    /// Allow every namespace
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterIdentityStatus {
    /// Observations on the identity
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl AzureClusterIdentity {
    /// Whether a cluster in `namespace` may use this identity
    pub fn is_allowed_namespace(&self, namespace: &str) -> bool {
        if self.metadata.namespace.as_deref() == Some(namespace) {
            return true;
        }
        match &self.spec.allowed_namespaces {
            Some(allowed) => allowed.all || allowed.list.iter().any(|n| n == namespace),
            None => false,
        }
    }
}

impl Conditioned for AzureClusterIdentity {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(namespace: &str, allowed: Option<AllowedNamespaces>) -> AzureClusterIdentity {
        let mut id = AzureClusterIdentity::new(
            "id",
            AzureClusterIdentitySpec {
                type_: IdentityType::ServicePrincipal,
                tenant_id: "t".to_string(),
                client_id: "c".to_string(),
                client_secret: None,
                allowed_namespaces: allowed,
            },
        );
        id.metadata.namespace = Some(namespace.to_string());
        id
    }

    #[test]
    fn test_allowed_namespaces() {
        assert!(identity("capz", None).is_allowed_namespace("capz"));
        assert!(!identity("capz", None).is_allowed_namespace("team-a"));

        let listed = identity(
            "capz",
            Some(AllowedNamespaces { list: vec!["team-a".to_string()], all: false }),
        );
        assert!(listed.is_allowed_namespace("team-a"));
        assert!(!listed.is_allowed_namespace("team-b"));

        let all = identity("capz", Some(AllowedNamespaces { list: vec![], all: true }));
        assert!(all.is_allowed_namespace("team-b"));
    }
}
