//! Per-reconcile scopes for Azure cluster infrastructure
//!
//! A scope wraps one desired-state object for a single reconcile pass. It
//! resolves credentials, derives the Azure resource specs the executors
//! act on, records long-running operations and conditions, and patches the
//! object once on close.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use azure_credentials::AzureClients;
//! use azure_scope::{ClusterScope, ClusterScopeParams, KubeScopeClient};
//!
//! # async fn example(
//! #     client: kube::Client,
//! #     cluster: crds::Cluster,
//! #     azure_cluster: crds::AzureCluster,
//! # ) -> Result<(), azure_scope::ScopeError> {
//! let scope = ClusterScope::new(ClusterScopeParams {
//!     client: Arc::new(KubeScopeClient::new(client)),
//!     azure_clients: AzureClients::from_env(),
//!     cluster,
//!     azure_cluster,
//! })
//! .await?;
//! for family in scope.resource_specs()? {
//!     println!("{}: {} specs", family.condition, family.specs.len());
//! }
//! scope.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod async_ops;
pub mod cache;
pub mod client;
pub mod conditions;
pub mod error;
pub mod identity;
pub mod lro;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod names;
pub mod patch;
pub mod rolling_update;
pub mod scope;
#[path = "trait.rs"]
pub mod scope_trait;
pub mod specs;
pub mod tags;
#[cfg(test)]
mod test_utils;

pub use client::{KubeNodeClient, KubeScopeClient};
pub use error::{OperationError, ScopeError};
pub use identity::IdentityCredentialsProvider;
pub use rolling_update::RollingUpdateStrategy;
pub use scope::{
    ClusterScope, ClusterScopeParams, ClusterScoper, InfraClusterScope, MachinePoolMachineScope,
    MachinePoolMachineScopeParams, MachinePoolScope, MachinePoolScopeParams, ManagedControlPlaneScope,
    ManagedControlPlaneScopeParams, ManagedMachinePoolScope, ManagedMachinePoolScopeParams, ScaleSetInstance,
    ScaleSetState, ServiceSpecs,
};
pub use scope_trait::{NodeClient, ObjectKind, ScopeClient};
pub use specs::{ResourceSpec, ResourceSpecGetter};
