//! Per-reconcile scopes
//!
//! A scope is built at the start of a reconcile pass, snapshots the object
//! it reconciles, accumulates changes through setters and patches them on
//! `close`. No scope outlives one pass.

pub mod cluster;
pub mod machine_pool;
pub mod machine_pool_machine;
pub mod managed_control_plane;
pub mod managed_machine_pool;

use azure_credentials::AzureClients;
use crds::tags::Tags;

pub use cluster::{ClusterScope, ClusterScopeParams, ServiceSpecs};
pub use machine_pool::{MachinePoolScope, MachinePoolScopeParams, ScaleSetInstance, ScaleSetState};
pub use machine_pool_machine::{MachinePoolMachineScope, MachinePoolMachineScopeParams};
pub use managed_control_plane::{ManagedControlPlaneScope, ManagedControlPlaneScopeParams};
pub use managed_machine_pool::{ManagedMachinePoolScope, ManagedMachinePoolScopeParams, agent_pool_spec};

/// What machine pool and machine scopes need to know about the cluster
pub trait ClusterScoper: Send + Sync {
    /// Cluster API cluster name
    fn cluster_name(&self) -> &str;

    /// Namespace of the cluster objects
    fn namespace(&self) -> &str;

    fn subscription_id(&self) -> &str;

    /// Resource group holding the cluster's own resources
    fn resource_group(&self) -> &str;

    /// Resource group holding node resources (same as `resource_group` unless managed)
    fn node_resource_group(&self) -> &str;

    fn location(&self) -> &str;

    fn vnet_name(&self) -> &str;

    fn vnet_resource_group(&self) -> &str;

    /// Subnet machine pools join when they do not name one
    fn node_subnet_name(&self) -> &str;

    /// Failure domain IDs, sorted ascending
    fn failure_domains(&self) -> Vec<String>;

    fn additional_tags(&self) -> Tags;

    fn azure_clients(&self) -> &AzureClients;

    /// Key for sharing cloud clients between scopes
    fn hash_key(&self) -> String {
        self.azure_clients().hash_key()
    }
}

/// Infrastructure cluster behind a machine pool
pub enum InfraClusterScope {
    /// Self-managed control plane
    Cluster(ClusterScope),
    /// Azure managed control plane
    Managed(ManagedControlPlaneScope),
}

impl InfraClusterScope {
    fn inner(&self) -> &dyn ClusterScoper {
        match self {
            InfraClusterScope::Cluster(scope) => scope,
            InfraClusterScope::Managed(scope) => scope,
        }
    }

    /// Patch whichever object the scope reconciles
    pub async fn close(self) -> Result<(), crate::error::ScopeError> {
        match self {
            InfraClusterScope::Cluster(scope) => scope.close().await,
            InfraClusterScope::Managed(scope) => scope.close().await,
        }
    }
}

impl ClusterScoper for InfraClusterScope {
    fn cluster_name(&self) -> &str {
        self.inner().cluster_name()
    }

    fn namespace(&self) -> &str {
        self.inner().namespace()
    }

    fn subscription_id(&self) -> &str {
        self.inner().subscription_id()
    }

    fn resource_group(&self) -> &str {
        self.inner().resource_group()
    }

    fn node_resource_group(&self) -> &str {
        self.inner().node_resource_group()
    }

    fn location(&self) -> &str {
        self.inner().location()
    }

    fn vnet_name(&self) -> &str {
        self.inner().vnet_name()
    }

    fn vnet_resource_group(&self) -> &str {
        self.inner().vnet_resource_group()
    }

    fn node_subnet_name(&self) -> &str {
        self.inner().node_subnet_name()
    }

    fn failure_domains(&self) -> Vec<String> {
        self.inner().failure_domains()
    }

    fn additional_tags(&self) -> Tags {
        self.inner().additional_tags()
    }

    fn azure_clients(&self) -> &AzureClients {
        self.inner().azure_clients()
    }
}
