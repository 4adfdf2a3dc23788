//! Long-running operation state persisted on the owning object
//!
//! Azure returns a resume token for asynchronous PUT/PATCH/DELETE calls. The
//! token is stored in status so the next reconcile pass can poll the same
//! operation instead of starting a new one.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of asynchronous operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum FutureType {
    /// Create or update (HTTP PUT)
    #[serde(rename = "PUT")]
    Create,
    /// In-place update (HTTP PATCH)
    #[serde(rename = "PATCH")]
    Update,
    /// Delete (HTTP DELETE)
    #[serde(rename = "DELETE")]
    Delete,
}

impl FutureType {
    /// HTTP verb the operation was started with
    pub fn as_str(&self) -> &'static str {
        match self {
            FutureType::Create => "PUT",
            FutureType::Update => "PATCH",
            FutureType::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for FutureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An in-flight asynchronous cloud operation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Future {
    /// Operation kind
    #[serde(rename = "type")]
    pub type_: FutureType,

    /// Service that started the operation (e.g. "publicips")
    pub service_name: String,

    /// Name of the Azure resource the operation acts on
    pub name: String,

    /// Resource group of that resource
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_group: String,

    /// Opaque resume token, base64 encoded
    pub data: String,
}

impl Future {
    /// True when this future is identified by the (name, service, type) tuple
    pub fn matches(&self, name: &str, service: &str, type_: FutureType) -> bool {
        self.name == name && self.service_name == service && self.type_ == type_
    }
}

/// Objects that persist long-running operation state.
pub trait LongRunningOperations {
    /// Persisted futures (empty when status is unset)
    fn futures(&self) -> &[Future];

    /// Mutable futures, creating the status on demand
    fn futures_mut(&mut self) -> &mut Vec<Future>;
}
