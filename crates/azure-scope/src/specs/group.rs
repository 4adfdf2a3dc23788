//! Resource group and tag specs

use crds::tags::Tags;

use super::ResourceSpecGetter;
use crate::tags::{TagsChange, tags_changed};

/// Cluster resource group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    pub location: String,
    pub cluster_name: String,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for GroupSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.name
    }
}

/// Tags to keep on an existing resource.
///
/// `annotation` names the annotation on the owning object holding the tags
/// applied last time, used for the three-way comparison in
/// [`crate::tags::tags_changed`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagsSpec {
    /// Azure resource ID the tags apply to
    pub scope: String,
    pub tags: Tags,
    pub annotation: String,
    /// Tags recorded under `annotation` by the previous successful apply
    pub last_applied: Tags,
}

impl TagsSpec {
    /// Compare with the tags currently on the Azure resource
    pub fn change(&self, current: &Tags) -> TagsChange {
        tags_changed(&self.last_applied, &self.tags, current)
    }
}

impl ResourceSpecGetter for TagsSpec {
    fn resource_name(&self) -> &str {
        &self.scope
    }

    fn resource_group_name(&self) -> &str {
        ""
    }
}
