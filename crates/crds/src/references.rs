//! Kubernetes object references used across the Azure CRDs
//!
//! Kept as plain serde structs rather than the k8s-openapi types so the CRD
//! schemas stay free of upstream schema quirks.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another Kubernetes object
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referent
    pub name: String,

    /// Namespace of the referent (cluster-scoped objects leave this empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// UID of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectReference {
    /// Reference by kind and name in the same namespace
    pub fn new(kind: &str, name: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.to_string()),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Reference by kind, name and namespace
    pub fn with_namespace(kind: &str, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.to_string()),
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }
}

/// Reference to a Secret by name and namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Secret name
    pub name: String,

    /// Secret namespace (defaults to the referencing object's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Reference to the AzureClusterIdentity used to authenticate
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityReference {
    /// Name of the AzureClusterIdentity
    pub name: String,

    /// Namespace of the AzureClusterIdentity (defaults to the cluster's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}
