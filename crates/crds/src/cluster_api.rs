//! Cluster API objects consumed by the Azure scopes
//!
//! Only the fields the infrastructure provider reads are modelled; unknown
//! fields are preserved by the API server and ignored here.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::ObjectReference;

/// API group of the core Cluster API objects
pub const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";

/// Label carrying the owning cluster name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Annotation marking a machine for deletion first when scaling down
pub const DELETE_MACHINE_ANNOTATION: &str = "cluster.x-k8s.io/delete-machine";

/// Annotation that skips node draining before deletion
pub const EXCLUDE_NODE_DRAINING_ANNOTATION: &str = "machine.cluster.x-k8s.io/exclude-node-draining";

/// Default API server port when the cluster network leaves it unset
pub const DEFAULT_API_SERVER_PORT: i32 = 6443;

/// Cluster is the top-level Cluster API object
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster network configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_network: Option<ClusterNetwork>,

    /// Endpoint used to reach the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// Reconciliation is paused
    #[serde(default)]
    pub paused: bool,

    /// Infrastructure object (AzureCluster or AzureManagedControlPlane)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Control plane object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,
}

/// Cluster network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    /// Port the API server binds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_port: Option<i32>,

    /// Service network ranges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<NetworkRanges>,

    /// Pod network ranges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods: Option<NetworkRanges>,

    /// Service DNS domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_domain: Option<String>,
}

/// A list of CIDR blocks
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRanges {
    /// CIDR blocks
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

/// Host and port of an API server
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    /// Hostname or IP
    #[serde(default)]
    pub host: String,

    /// Port
    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    /// Both host and port unset
    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

/// Observed cluster state
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Infrastructure is ready
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// Control plane is ready
    #[serde(default)]
    pub control_plane_ready: bool,
}

/// A failure domain advertised to Cluster API
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomainSpec {
    /// Control plane machines may be placed in this domain
    #[serde(default)]
    pub control_plane: bool,

    /// Free-form attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Failure domains keyed by ID (Azure availability zone)
pub type FailureDomains = BTreeMap<String, FailureDomainSpec>;

/// MachinePool is the Cluster API group of identical machines
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachinePool",
    namespaced,
    status = "MachinePoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolSpec {
    /// Owning cluster
    #[serde(default)]
    pub cluster_name: String,

    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Machine template
    #[serde(default)]
    pub template: MachineTemplateSpec,

    /// Failure domains the pool spreads across
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_domains: Vec<String>,

    /// Provider IDs reported by the infrastructure pool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_id_list: Vec<String>,
}

/// Template wrapper
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    /// Machine spec
    #[serde(default)]
    pub spec: MachineSpec,
}

/// Machine spec fields used by the Azure scopes
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Kubernetes version (e.g. "v1.30.2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Owning cluster
    #[serde(default)]
    pub cluster_name: String,
}

/// Observed machine pool state
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolStatus {
    /// Observed replicas
    #[serde(default)]
    pub replicas: i32,

    /// Ready replicas
    #[serde(default)]
    pub ready_replicas: i32,
}

impl Cluster {
    /// API server port, defaulting to 6443
    pub fn api_server_port(&self) -> i32 {
        self.spec
            .cluster_network
            .as_ref()
            .and_then(|n| n.api_server_port)
            .unwrap_or(DEFAULT_API_SERVER_PORT)
    }
}
