//! Azure resource tags and cluster ownership
//!
//! Ownership is recorded on Azure resources as a tag keyed by the cluster
//! name. A resource carrying the tag with value "owned" is managed by this
//! cluster and may be deleted with it.

use std::collections::BTreeMap;

/// Azure tags
pub type Tags = BTreeMap<String, String>;

/// Prefix of the cluster ownership tag key
pub const OWNERSHIP_TAG_PREFIX: &str = "sigs.k8s.io_cluster-api-provider-azure_cluster_";

/// Tag key recording the role of a resource (e.g. "common", "control-plane")
pub const ROLE_TAG_KEY: &str = "sigs.k8s.io_cluster-api-provider-azure_role";

/// Tag key carrying the resource name
pub const NAME_TAG_KEY: &str = "Name";

/// Value of the ownership tag for owned resources
pub const RESOURCE_LIFECYCLE_OWNED: &str = "owned";

/// Value of the ownership tag for shared resources
pub const RESOURCE_LIFECYCLE_SHARED: &str = "shared";

/// Role tag value for resources shared by the whole cluster
pub const COMMON_ROLE: &str = "common";

/// Ownership tag key for a cluster
pub fn cluster_tag_key(cluster_name: &str) -> String {
    format!("{OWNERSHIP_TAG_PREFIX}{cluster_name}")
}

/// True when the tags mark the resource as owned by `cluster_name`
pub fn has_owned(tags: &Tags, cluster_name: &str) -> bool {
    tags.get(&cluster_tag_key(cluster_name))
        .is_some_and(|v| v == RESOURCE_LIFECYCLE_OWNED)
}

/// Tags applied to a newly created resource owned by `cluster_name`
///
/// Additional tags are merged last so users can set `Name` and role.
pub fn build(cluster_name: &str, name: &str, role: &str, additional: &Tags) -> Tags {
    let mut tags = Tags::new();
    tags.insert(cluster_tag_key(cluster_name), RESOURCE_LIFECYCLE_OWNED.to_string());
    if !name.is_empty() {
        tags.insert(NAME_TAG_KEY.to_string(), name.to_string());
    }
    if !role.is_empty() {
        tags.insert(ROLE_TAG_KEY.to_string(), role.to_string());
    }
    tags.extend(additional.iter().map(|(k, v)| (k.clone(), v.clone())));
    tags
}
