//! Kubernetes access used by the scopes
//!
//! Scopes never talk to the API server directly. Everything they read or
//! write goes through [`ScopeClient`], and workload cluster access goes
//! through [`NodeClient`], so tests can swap in the in-memory mock.

use std::collections::BTreeMap;
use std::sync::Arc;

use crds::{
    AzureCluster, AzureClusterIdentity, AzureMachinePool, AzureMachinePoolMachine, AzureManagedControlPlane,
    AzureManagedMachinePool, Cluster, MachinePool,
};
use k8s_openapi::api::core::v1::{Node, Pod, Secret};

use crate::error::ScopeError;

/// Objects whose metadata, spec or status a scope patches on close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    AzureCluster,
    AzureManagedControlPlane,
    AzureManagedMachinePool,
    AzureMachinePool,
    AzureMachinePoolMachine,
}

impl ObjectKind {
    /// Kind as it appears in `kind:`
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::AzureCluster => "AzureCluster",
            ObjectKind::AzureManagedControlPlane => "AzureManagedControlPlane",
            ObjectKind::AzureManagedMachinePool => "AzureManagedMachinePool",
            ObjectKind::AzureMachinePool => "AzureMachinePool",
            ObjectKind::AzureMachinePoolMachine => "AzureMachinePoolMachine",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Management cluster operations
///
/// Getters return `Ok(None)` for objects that do not exist.
#[async_trait::async_trait]
pub trait ScopeClient: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ScopeError>;

    /// Create or replace a secret (server-side apply)
    async fn apply_secret(&self, secret: &Secret) -> Result<(), ScopeError>;

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ScopeError>;

    async fn get_cluster_identity(&self, namespace: &str, name: &str)
    -> Result<Option<AzureClusterIdentity>, ScopeError>;

    async fn get_azure_cluster(&self, namespace: &str, name: &str) -> Result<Option<AzureCluster>, ScopeError>;

    async fn get_managed_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureManagedControlPlane>, ScopeError>;

    async fn get_machine_pool(&self, namespace: &str, name: &str) -> Result<Option<MachinePool>, ScopeError>;

    async fn get_azure_machine_pool(&self, namespace: &str, name: &str)
    -> Result<Option<AzureMachinePool>, ScopeError>;

    async fn list_managed_machine_pools(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AzureManagedMachinePool>, ScopeError>;

    async fn list_machine_pool_machines(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AzureMachinePoolMachine>, ScopeError>;

    async fn create_machine_pool_machine(
        &self,
        machine: &AzureMachinePoolMachine,
    ) -> Result<AzureMachinePoolMachine, ScopeError>;

    /// Delete a record; a record that is already gone counts as deleted
    async fn delete_machine_pool_machine(&self, namespace: &str, name: &str) -> Result<(), ScopeError>;

    /// JSON merge patch on metadata and spec
    async fn patch_object(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ScopeError>;

    /// JSON merge patch on the status subresource
    async fn patch_object_status(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ScopeError>;

    /// Client for the workload cluster, built from the `<cluster>-kubeconfig` secret
    async fn workload_cluster_client(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Arc<dyn NodeClient>, ScopeError>;
}

/// Workload cluster operations needed to bind and drain nodes
#[async_trait::async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, ScopeError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, ScopeError>;

    /// Mark a node unschedulable
    async fn cordon_node(&self, name: &str) -> Result<(), ScopeError>;

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, ScopeError>;

    /// Evict a pod through the eviction API so disruption budgets apply
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ScopeError>;
}
