//! Snapshot-and-diff patch helper
//!
//! A scope snapshots its object when it is built and mutates the in-memory
//! copy. On close the helper diffs the two and sends JSON merge patches
//! (RFC 7386): one for metadata and spec, one for the status subresource.
//! The first patch sent carries the snapshot's `resourceVersion`, so a
//! concurrent writer makes the pass fail with a conflict instead of being
//! overwritten.

use kube::Resource;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::ScopeError;
use crate::scope_trait::{ObjectKind, ScopeClient};

/// Metadata fields a scope may change
const PATCHED_METADATA_FIELDS: &[&str] = &["labels", "annotations", "finalizers", "ownerReferences"];

/// Merge patch turning `original` into `modified`; `None` when they are equal.
///
/// Removed keys become `null`, arrays are replaced as a whole.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Option<Value> {
    match (original, modified) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for key in before.keys() {
                if !after.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, value) in after {
                match before.get(key) {
                    Some(old) if old == value => {}
                    Some(old) if old.is_object() && value.is_object() => {
                        if let Some(nested) = create_merge_patch(old, value) {
                            patch.insert(key.clone(), nested);
                        }
                    }
                    _ => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            if patch.is_empty() { None } else { Some(Value::Object(patch)) }
        }
        _ if original == modified => None,
        _ => Some(modified.clone()),
    }
}

/// Apply a merge patch in place
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply_merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn spec_view(object: &Value) -> Value {
    let mut view = Map::new();
    if let Some(metadata) = object.get("metadata").and_then(Value::as_object) {
        let fields: Map<String, Value> = PATCHED_METADATA_FIELDS
            .iter()
            .filter_map(|f| metadata.get(*f).map(|v| (f.to_string(), v.clone())))
            .collect();
        view.insert("metadata".to_string(), Value::Object(fields));
    }
    if let Some(spec) = object.get("spec") {
        view.insert("spec".to_string(), spec.clone());
    }
    Value::Object(view)
}

fn status_view(object: &Value) -> Value {
    json!({ "status": object.get("status").cloned().unwrap_or(Value::Null) })
}

/// Diffs an object against its snapshot and patches the changes
#[derive(Debug, Clone)]
pub struct PatchHelper {
    kind: ObjectKind,
    namespace: String,
    name: String,
    resource_version: Option<String>,
    before: Value,
}

impl PatchHelper {
    /// Snapshot `obj`
    pub fn new<K>(kind: ObjectKind, obj: &K) -> Result<Self, ScopeError>
    where
        K: Resource + Serialize,
    {
        let meta = obj.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| ScopeError::InvalidInput(format!("{kind} has no name")))?;
        Ok(Self {
            kind,
            namespace: meta.namespace.clone().unwrap_or_default(),
            name,
            resource_version: meta.resource_version.clone(),
            before: serde_json::to_value(obj)?,
        })
    }

    /// Metadata/spec patch and status patch for `obj`, in the order they are sent
    pub fn compute_patches<K: Serialize>(&self, obj: &K) -> Result<(Option<Value>, Option<Value>), ScopeError> {
        let after = serde_json::to_value(obj)?;
        let mut spec_patch = create_merge_patch(&spec_view(&self.before), &spec_view(&after));
        let mut status_patch = create_merge_patch(&status_view(&self.before), &status_view(&after));

        if let Some(resource_version) = &self.resource_version {
            let first = spec_patch.as_mut().or(status_patch.as_mut());
            if let Some(Value::Object(first)) = first {
                let metadata = first
                    .entry("metadata".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(metadata) = metadata {
                    metadata.insert("resourceVersion".to_string(), Value::String(resource_version.clone()));
                }
            }
        }
        Ok((spec_patch, status_patch))
    }

    /// Send whatever changed since the snapshot
    pub async fn patch<K: Serialize>(&self, client: &dyn ScopeClient, obj: &K) -> Result<(), ScopeError> {
        let (spec_patch, status_patch) = self.compute_patches(obj)?;
        if spec_patch.is_none() && status_patch.is_none() {
            debug!(kind = %self.kind, name = %self.name, "nothing to patch");
            return Ok(());
        }
        if let Some(patch) = spec_patch {
            client.patch_object(self.kind, &self.namespace, &self.name, &patch).await?;
        }
        if let Some(patch) = status_patch {
            client
                .patch_object_status(self.kind, &self.namespace, &self.name, &patch)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_patch_nulls_removed_keys() {
        let before = json!({"a": 1, "b": {"c": 2, "d": 3}, "list": [1, 2]});
        let after = json!({"b": {"c": 2, "d": 4}, "list": [1], "e": "new"});
        let patch = create_merge_patch(&before, &after).unwrap();
        assert_eq!(patch, json!({"a": null, "b": {"d": 4}, "list": [1], "e": "new"}));

        let mut applied = before.clone();
        apply_merge_patch(&mut applied, &patch);
        assert_eq!(applied, after);
    }

    #[test]
    fn test_equal_values_yield_no_patch() {
        let value = json!({"a": {"b": [1, 2, 3]}});
        assert!(create_merge_patch(&value, &value).is_none());
    }

    #[test]
    fn test_helper_separates_status_and_adds_resource_version() {
        let mut cluster = crds::AzureCluster::new("c1", Default::default());
        cluster.metadata.namespace = Some("default".to_string());
        cluster.metadata.resource_version = Some("42".to_string());
        let helper = PatchHelper::new(ObjectKind::AzureCluster, &cluster).unwrap();

        cluster.spec.location = "westus2".to_string();
        cluster.status.get_or_insert_with(Default::default).ready = true;

        let (spec_patch, status_patch) = helper.compute_patches(&cluster).unwrap();
        let spec_patch = spec_patch.unwrap();
        assert_eq!(spec_patch["spec"]["location"], "westus2");
        assert_eq!(spec_patch["metadata"]["resourceVersion"], "42");

        let status_patch = status_patch.unwrap();
        assert_eq!(status_patch["status"]["ready"], true);
        assert!(status_patch.get("metadata").is_none());
    }

    #[test]
    fn test_status_only_change_carries_resource_version() {
        let mut cluster = crds::AzureCluster::new("c1", Default::default());
        cluster.metadata.resource_version = Some("7".to_string());
        let helper = PatchHelper::new(ObjectKind::AzureCluster, &cluster).unwrap();

        cluster.status.get_or_insert_with(Default::default).ready = true;
        let (spec_patch, status_patch) = helper.compute_patches(&cluster).unwrap();
        assert!(spec_patch.is_none());
        assert_eq!(status_patch.unwrap()["metadata"]["resourceVersion"], "7");
    }
}
