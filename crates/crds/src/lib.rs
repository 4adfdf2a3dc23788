//! Azure infrastructure CRD definitions
//!
//! Desired-state objects for Azure hosted clusters plus the Cluster API
//! objects they reference, status conditions and long-running operation
//! state.

pub mod azure_cluster;
pub mod azure_cluster_identity;
pub mod azure_machine_pool;
pub mod azure_machine_pool_machine;
pub mod azure_managed_control_plane;
pub mod azure_managed_machine_pool;
pub mod cluster_api;
pub mod conditions;
pub mod defaults;
pub mod futures;
pub mod network;
pub mod references;
pub mod tags;

pub use azure_cluster::*;
pub use azure_cluster_identity::*;
pub use azure_machine_pool::*;
pub use azure_machine_pool_machine::*;
pub use azure_managed_control_plane::*;
pub use azure_managed_machine_pool::*;
pub use cluster_api::*;
pub use network::*;
pub use references::*;
