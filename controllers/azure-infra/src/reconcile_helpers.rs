//! Helper functions shared by the reconcilers
//!
//! Owner lookup, finalizer bookkeeping, requeue decisions and the status
//! patch written when a scope cannot even be built.

use std::time::Duration;

use azure_scope::OperationError;
use crds::conditions::{self, ConditionSeverity, Conditioned, READY, reasons};
use kube::api::ObjectMeta;
use kube_runtime::controller::Action;
use serde_json::json;

/// Requeue delay while a long-running Azure operation is still in progress
pub const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Requeue delay for a healthy object
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(600);

/// `namespace/name` key used for logging and backoff bookkeeping
pub fn object_key(meta: &ObjectMeta) -> String {
    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    )
}

/// Name of the first owner of `kind` whose API group is `group`
pub fn owner_name(meta: &ObjectMeta, kind: &str, group: &str) -> Option<String> {
    meta.owner_references
        .iter()
        .flatten()
        .find(|o| o.kind == kind && o.api_version.split('/').next() == Some(group))
        .map(|o| o.name.clone())
}

pub fn is_deleting(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}

/// Add a finalizer; returns whether it was missing
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if finalizers.iter().any(|f| f == finalizer) {
        return false;
    }
    finalizers.push(finalizer.to_string());
    true
}

/// Remove a finalizer; returns whether it was present
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    before != finalizers.len()
}

/// Status patch marking `Ready` False with reason `AuthFailed`
pub fn auth_failed_status_patch(obj: &mut dyn Conditioned, message: &str) -> serde_json::Value {
    conditions::mark_false(obj, READY, reasons::AUTH_FAILED, ConditionSeverity::Error, message);
    json!({ "status": { "conditions": obj.conditions() } })
}

/// Requeue delay once every resource family was driven without a terminal failure
pub fn requeue_after(outcomes: &[Result<(), OperationError>]) -> Action {
    let pending = outcomes
        .iter()
        .any(|r| matches!(r, Err(err) if err.is_operation_not_done()));
    if pending {
        Action::requeue(OPERATION_POLL_INTERVAL)
    } else {
        Action::requeue(RESYNC_INTERVAL)
    }
}

/// First terminal failure, for the error returned to the runtime
pub fn first_failure(outcomes: Vec<Result<(), OperationError>>) -> Option<OperationError> {
    outcomes
        .into_iter()
        .filter_map(Result::err)
        .find(|err| !err.is_operation_not_done())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::AzureCluster;
    use crds::futures::{Future, FutureType};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn owner(kind: &str, api_version: &str, name: &str) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("{name}-uid"),
            ..Default::default()
        }
    }

    fn failed() -> OperationError {
        OperationError::Failed {
            service: "publicips".to_string(),
            name: "pip-1".to_string(),
            message: "boom".to_string(),
        }
    }

    fn not_done() -> OperationError {
        OperationError::NotDone(Future {
            type_: FutureType::Create,
            service_name: "publicips".to_string(),
            name: "pip-1".to_string(),
            resource_group: "my-rg".to_string(),
            data: "token".to_string(),
        })
    }

    #[test]
    fn test_owner_name_matches_kind_and_group() {
        let meta = ObjectMeta {
            owner_references: Some(vec![
                owner("Cluster", "other.example.com/v1", "wrong"),
                owner("Cluster", "cluster.x-k8s.io/v1beta1", "my-cluster"),
            ]),
            ..Default::default()
        };
        assert_eq!(owner_name(&meta, "Cluster", "cluster.x-k8s.io").as_deref(), Some("my-cluster"));
        assert_eq!(owner_name(&meta, "MachinePool", "cluster.x-k8s.io"), None);
    }

    #[test]
    fn test_finalizer_add_and_remove() {
        let mut meta = ObjectMeta::default();
        assert!(add_finalizer(&mut meta, "a"));
        assert!(!add_finalizer(&mut meta, "a"));
        assert_eq!(meta.finalizers, Some(vec!["a".to_string()]));

        assert!(remove_finalizer(&mut meta, "a"));
        assert!(!remove_finalizer(&mut meta, "a"));
        assert_eq!(meta.finalizers, Some(vec![]));
    }

    #[test]
    fn test_object_key() {
        let meta = ObjectMeta {
            name: Some("c1".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        };
        assert_eq!(object_key(&meta), "default/c1");
    }

    #[test]
    fn test_auth_failed_status_patch() {
        let mut cluster = AzureCluster::new("c1", Default::default());
        let patch = auth_failed_status_patch(&mut cluster, "no subscription");

        let condition = &patch["status"]["conditions"][0];
        assert_eq!(condition["type"], READY);
        assert_eq!(condition["status"], "False");
        assert_eq!(condition["reason"], reasons::AUTH_FAILED);
        assert_eq!(condition["message"], "no subscription");
    }

    #[test]
    fn test_requeue_after_outcomes() {
        assert_eq!(requeue_after(&[Ok(())]), Action::requeue(RESYNC_INTERVAL));
        assert_eq!(requeue_after(&[]), Action::requeue(RESYNC_INTERVAL));
        assert_eq!(
            requeue_after(&[Ok(()), Err(not_done())]),
            Action::requeue(OPERATION_POLL_INTERVAL)
        );
    }

    #[test]
    fn test_first_failure_skips_not_done() {
        let failure = first_failure(vec![Err(not_done()), Ok(()), Err(failed())]);
        assert!(matches!(failure, Some(OperationError::Failed { message, .. }) if message == "boom"));
        assert!(first_failure(vec![Err(not_done())]).is_none());
    }
}
