//! Last-applied tag tracking
//!
//! Tags the controller applied are recorded as JSON in an annotation on the
//! owning object. Comparing that record with the desired and the current
//! Azure tags lets the controller delete tags it added earlier without
//! touching tags set by someone else.

use std::collections::BTreeMap;

use crds::tags::Tags;
use kube::api::ObjectMeta;

use crate::error::ScopeError;

/// Annotation holding the tags last applied to the cluster resource group
pub const RESOURCE_GROUP_TAGS_LAST_APPLIED_ANNOTATION: &str =
    "sigs.k8s.io/cluster-api-provider-azure-last-applied-tags-rg";

/// Annotation holding the security rules last applied per NSG
pub const SECURITY_RULES_LAST_APPLIED_ANNOTATION: &str = "sigs.k8s.io/azure-security-rules";

/// Result of a three-way tag comparison
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagsChange {
    /// Anything to create, update or delete
    pub changed: bool,
    /// Tags missing or different on the resource
    pub created_or_updated: Tags,
    /// Tags applied before and no longer desired
    pub deleted: Tags,
    /// Annotation value to record after applying
    pub new_annotation: Tags,
}

/// Compare last-applied, desired and current tags
pub fn tags_changed(last_applied: &Tags, desired: &Tags, current: &Tags) -> TagsChange {
    let mut change = TagsChange::default();

    for (key, value) in last_applied {
        if !desired.contains_key(key) {
            change.changed = true;
            change.deleted.insert(key.clone(), value.clone());
        }
    }

    for (key, value) in desired {
        change.new_annotation.insert(key.clone(), value.clone());
        if current.get(key) != Some(value) {
            change.changed = true;
            change.created_or_updated.insert(key.clone(), value.clone());
        }
    }

    change
}

/// Read a JSON annotation; absent annotations read as the default value
pub fn annotation_json<T>(meta: &ObjectMeta, key: &str) -> Result<T, ScopeError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match meta.annotations.as_ref().and_then(|a| a.get(key)) {
        Some(raw) if !raw.is_empty() => Ok(serde_json::from_str(raw)?),
        _ => Ok(T::default()),
    }
}

/// Write a JSON annotation; empty maps remove it
pub fn update_annotation_json<T>(meta: &mut ObjectMeta, key: &str, value: &BTreeMap<String, T>) -> Result<(), ScopeError>
where
    T: serde::Serialize,
{
    let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    if value.is_empty() {
        annotations.remove(key);
    } else {
        annotations.insert(key.to_string(), serde_json::to_string(value)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_tags_changed_three_way() {
        let last_applied = tags(&[("foo", "hello"), ("old", "gone")]);
        let desired = tags(&[("foo", "hello"), ("new", "value")]);
        let current = tags(&[("foo", "hello"), ("old", "gone"), ("external", "keep")]);

        let change = tags_changed(&last_applied, &desired, &current);
        assert!(change.changed);
        assert_eq!(change.created_or_updated, tags(&[("new", "value")]));
        assert_eq!(change.deleted, tags(&[("old", "gone")]));
        assert_eq!(change.new_annotation, desired);
    }

    #[test]
    fn test_tags_unchanged() {
        let all = tags(&[("foo", "bar")]);
        let change = tags_changed(&all, &all, &all);
        assert!(!change.changed);
        assert!(change.created_or_updated.is_empty());
        assert!(change.deleted.is_empty());
    }

    #[test]
    fn test_updated_value_is_detected() {
        let change = tags_changed(&tags(&[("foo", "a")]), &tags(&[("foo", "b")]), &tags(&[("foo", "a")]));
        assert_eq!(change.created_or_updated, tags(&[("foo", "b")]));
    }

    #[test]
    fn test_annotation_json_round_trip() {
        let mut meta = ObjectMeta::default();
        let empty: Tags = annotation_json(&meta, RESOURCE_GROUP_TAGS_LAST_APPLIED_ANNOTATION).unwrap();
        assert!(empty.is_empty());

        update_annotation_json(&mut meta, RESOURCE_GROUP_TAGS_LAST_APPLIED_ANNOTATION, &tags(&[("a", "b")])).unwrap();
        let read: Tags = annotation_json(&meta, RESOURCE_GROUP_TAGS_LAST_APPLIED_ANNOTATION).unwrap();
        assert_eq!(read, tags(&[("a", "b")]));

        update_annotation_json(&mut meta, RESOURCE_GROUP_TAGS_LAST_APPLIED_ANNOTATION, &Tags::new()).unwrap();
        assert!(!meta.annotations.unwrap().contains_key(RESOURCE_GROUP_TAGS_LAST_APPLIED_ANNOTATION));
    }
}
