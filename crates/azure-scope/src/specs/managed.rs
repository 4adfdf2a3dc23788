//! Managed cluster (AKS) specs

use std::collections::BTreeMap;

use crds::azure_managed_control_plane::{
    AadProfile, AddonProfile, ApiServerAccessProfile, LoadBalancerProfile,
};
use crds::tags::Tags;

use super::ResourceSpecGetter;

/// Managed cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedClusterSpec {
    pub name: String,
    pub resource_group: String,
    pub node_resource_group: String,
    pub cluster_name: String,
    pub location: String,
    pub tags: Tags,
    /// Kubernetes version without the leading `v`
    pub version: String,
    pub vnet_subnet_id: String,
    /// Decoded SSH public key
    pub ssh_public_key: String,
    pub network_plugin: Option<String>,
    pub network_policy: Option<String>,
    pub outbound_type: Option<String>,
    pub load_balancer_sku: Option<String>,
    pub service_cidr: Option<String>,
    pub pod_cidr: Option<String>,
    pub dns_service_ip: Option<String>,
    /// `IPv4` and/or `IPv6`, following the service CIDR
    pub ip_families: Vec<String>,
    pub aad_profile: Option<AadProfile>,
    pub sku_tier: Option<String>,
    pub load_balancer_profile: Option<LoadBalancerProfile>,
    pub api_server_access_profile: Option<ApiServerAccessProfile>,
    pub addon_profiles: Vec<AddonProfile>,
}

impl ResourceSpecGetter for ManagedClusterSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }
}

/// One agent pool of a managed cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentPoolSpec {
    pub name: String,
    pub resource_group: String,
    /// Managed cluster the pool belongs to
    pub cluster: String,
    pub version: Option<String>,
    pub sku: String,
    pub replicas: i32,
    pub os_disk_size_gb: i32,
    pub vnet_subnet_id: String,
    /// `System` or `User`
    pub mode: String,
    pub max_count: Option<i32>,
    pub min_count: Option<i32>,
    pub enable_auto_scaling: bool,
    pub node_labels: BTreeMap<String, String>,
    /// `key=value:effect`
    pub node_taints: Vec<String>,
    pub availability_zones: Vec<String>,
    pub max_pods: Option<i32>,
    pub os_disk_type: Option<String>,
    pub enable_ultra_ssd: Option<bool>,
    pub os_type: Option<String>,
    pub enable_node_public_ip: Option<bool>,
    pub enable_fips: Option<bool>,
    pub scale_set_priority: Option<String>,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for AgentPoolSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn owner_resource_name(&self) -> &str {
        &self.cluster
    }
}
