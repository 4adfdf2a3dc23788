//! Drive asynchronous Azure operations across reconcile passes
//!
//! An executor starts an operation and either finishes it or hands back a
//! resume token. Unfinished operations are stored as futures on the owning
//! object; the next pass resumes them from the token instead of starting a
//! new operation.

use crds::conditions::Conditioned;
use crds::futures::{Future, FutureType, LongRunningOperations};
use tracing::{debug, info};

use crate::conditions::{update_delete_status, update_put_status};
use crate::error::OperationError;
use crate::lro;
use crate::scope::ScaleSetState;
use crate::specs::{ResourceSpec, ResourceSpecGetter};

/// State of an operation after one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Finished successfully
    Done,
    /// Still running; resume with this token
    InProgress(String),
}

/// Cloud-side executor for one resource family
#[async_trait::async_trait]
pub trait ResourceOperator: Send + Sync {
    /// Service name, e.g. "publicips"
    fn service_name(&self) -> &str;

    /// Start or resume a create-or-update
    async fn create_or_update_async(
        &self,
        spec: &ResourceSpec,
        resume_token: Option<&str>,
    ) -> Result<OperationStatus, OperationError>;

    /// Start or resume a delete
    async fn delete_async(&self, spec: &ResourceSpec, resume_token: Option<&str>)
    -> Result<OperationStatus, OperationError>;

    /// Scale set backing `spec` as Azure reports it.
    ///
    /// Only scale set and agent pool executors observe anything; `None`
    /// means the scale set does not exist yet.
    async fn observed_scale_set(&self, _spec: &ResourceSpec) -> Result<Option<ScaleSetState>, OperationError> {
        Ok(None)
    }
}

fn finish<T>(
    obj: &mut T,
    spec: &ResourceSpec,
    service: &str,
    type_: FutureType,
    outcome: Result<OperationStatus, OperationError>,
) -> Result<(), OperationError>
where
    T: LongRunningOperations,
{
    let name = spec.resource_name();
    match outcome {
        Ok(OperationStatus::Done) => {
            lro::delete(obj, name, service, type_);
            Ok(())
        }
        Ok(OperationStatus::InProgress(token)) => {
            let future = Future {
                type_,
                service_name: service.to_string(),
                name: name.to_string(),
                resource_group: spec.resource_group_name().to_string(),
                data: token,
            };
            lro::set(obj, future.clone());
            Err(OperationError::NotDone(future))
        }
        Err(err) if err.is_operation_not_done() => {
            if let OperationError::NotDone(future) = &err {
                lro::set(obj, future.clone());
            }
            Err(err)
        }
        Err(err) => {
            lro::delete(obj, name, service, type_);
            Err(err)
        }
    }
}

/// Create or update one resource, resuming a stored future when present
pub async fn create_or_update_resource<T>(
    obj: &mut T,
    operator: &dyn ResourceOperator,
    spec: &ResourceSpec,
) -> Result<(), OperationError>
where
    T: LongRunningOperations + Send,
{
    let service = operator.service_name().to_string();
    let name = spec.resource_name();
    let resume = lro::get(obj, name, &service, FutureType::Create).map(|f| f.data.clone());
    if resume.is_some() {
        debug!(service = %service, resource = %name, "resuming create or update");
    }

    let outcome = operator.create_or_update_async(spec, resume.as_deref()).await;
    let result = finish(obj, spec, &service, FutureType::Create, outcome);
    if result.is_ok() {
        info!(service = %service, resource = %name, "successfully created or updated resource");
    }
    result
}

/// Delete one resource, resuming a stored future when present
pub async fn delete_resource<T>(obj: &mut T, operator: &dyn ResourceOperator, spec: &ResourceSpec) -> Result<(), OperationError>
where
    T: LongRunningOperations + Send,
{
    let service = operator.service_name().to_string();
    let name = spec.resource_name();
    let resume = lro::get(obj, name, &service, FutureType::Delete).map(|f| f.data.clone());

    let outcome = operator.delete_async(spec, resume.as_deref()).await;
    let result = finish(obj, spec, &service, FutureType::Delete, outcome);
    if result.is_ok() {
        info!(service = %service, resource = %name, "successfully deleted resource");
    }
    result
}

/// Keep the most severe error: a terminal failure outranks "not done"
fn keep_worst(current: Option<OperationError>, err: OperationError) -> Option<OperationError> {
    match current {
        Some(existing) if !existing.is_operation_not_done() || err.is_operation_not_done() => Some(existing),
        _ => Some(err),
    }
}

/// Create or update every spec, then set `condition` from the combined outcome.
///
/// One failing resource does not stop its siblings.
pub async fn reconcile_all<T>(
    obj: &mut T,
    operator: &dyn ResourceOperator,
    specs: &[ResourceSpec],
    condition: &str,
) -> Result<(), OperationError>
where
    T: Conditioned + LongRunningOperations + Send,
{
    let mut worst = None;
    for spec in specs {
        if let Err(err) = create_or_update_resource(obj, operator, spec).await {
            worst = keep_worst(worst, err);
        }
    }
    update_put_status(obj, condition, operator.service_name(), worst.as_ref());
    worst.map_or(Ok(()), Err)
}

/// Delete every spec, then set `condition` from the combined outcome
pub async fn delete_all<T>(
    obj: &mut T,
    operator: &dyn ResourceOperator,
    specs: &[ResourceSpec],
    condition: &str,
) -> Result<(), OperationError>
where
    T: Conditioned + LongRunningOperations + Send,
{
    let mut worst = None;
    for spec in specs {
        if let Err(err) = delete_resource(obj, operator, spec).await {
            worst = keep_worst(worst, err);
        }
    }
    update_delete_status(obj, condition, operator.service_name(), worst.as_ref());
    worst.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::PublicIpSpec;
    use crds::AzureCluster;
    use crds::conditions::{self, ConditionSeverity, PUBLIC_IPS_READY, reasons};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers per resource name; the last answer repeats
    struct ScriptedOperator {
        answers: Mutex<HashMap<String, Vec<Result<OperationStatus, String>>>>,
        seen_tokens: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedOperator {
        fn new(script: &[(&str, Vec<Result<OperationStatus, String>>)]) -> Self {
            Self {
                answers: Mutex::new(script.iter().map(|(n, a)| (n.to_string(), a.clone())).collect()),
                seen_tokens: Mutex::new(Vec::new()),
            }
        }

        fn answer(&self, spec: &ResourceSpec, token: Option<&str>) -> Result<OperationStatus, OperationError> {
            self.seen_tokens.lock().unwrap().push(token.map(str::to_string));
            let mut answers = self.answers.lock().unwrap();
            let queue = answers.get_mut(spec.resource_name()).unwrap();
            let answer = if queue.len() > 1 { queue.remove(0) } else { queue[0].clone() };
            answer.map_err(|message| OperationError::Failed {
                service: "publicips".to_string(),
                name: spec.resource_name().to_string(),
                message,
            })
        }
    }

    #[async_trait::async_trait]
    impl ResourceOperator for ScriptedOperator {
        fn service_name(&self) -> &str {
            "publicips"
        }

        async fn create_or_update_async(
            &self,
            spec: &ResourceSpec,
            resume_token: Option<&str>,
        ) -> Result<OperationStatus, OperationError> {
            self.answer(spec, resume_token)
        }

        async fn delete_async(
            &self,
            spec: &ResourceSpec,
            resume_token: Option<&str>,
        ) -> Result<OperationStatus, OperationError> {
            self.answer(spec, resume_token)
        }
    }

    fn pip(name: &str) -> ResourceSpec {
        PublicIpSpec {
            name: name.to_string(),
            resource_group: "rg".to_string(),
            ..Default::default()
        }
        .into()
    }

    #[tokio::test]
    async fn test_future_survives_until_done() {
        let mut cluster = AzureCluster::new("c", Default::default());
        let operator = ScriptedOperator::new(&[(
            "pip-1",
            vec![Ok(OperationStatus::InProgress("token-1".to_string())), Ok(OperationStatus::Done)],
        )]);

        let err = reconcile_all(&mut cluster, &operator, &[pip("pip-1")], PUBLIC_IPS_READY)
            .await
            .unwrap_err();
        assert!(err.is_operation_not_done());
        assert_eq!(lro::get(&cluster, "pip-1", "publicips", FutureType::Create).unwrap().data, "token-1");
        let condition = conditions::get(&cluster, PUBLIC_IPS_READY).unwrap();
        assert_eq!(condition.reason.as_deref(), Some(reasons::CREATING));
        assert_eq!(condition.severity, Some(ConditionSeverity::Info));

        reconcile_all(&mut cluster, &operator, &[pip("pip-1")], PUBLIC_IPS_READY)
            .await
            .unwrap();
        assert!(lro::get(&cluster, "pip-1", "publicips", FutureType::Create).is_none());
        assert!(conditions::is_true(&cluster, PUBLIC_IPS_READY));
        assert_eq!(
            *operator.seen_tokens.lock().unwrap(),
            vec![None, Some("token-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_terminal_error_outranks_not_done_and_siblings_continue() {
        let mut cluster = AzureCluster::new("c", Default::default());
        let operator = ScriptedOperator::new(&[
            ("pip-1", vec![Ok(OperationStatus::InProgress("t".to_string()))]),
            ("pip-2", vec![Err("quota exceeded".to_string())]),
            ("pip-3", vec![Ok(OperationStatus::Done)]),
        ]);

        let err = reconcile_all(
            &mut cluster,
            &operator,
            &[pip("pip-1"), pip("pip-2"), pip("pip-3")],
            PUBLIC_IPS_READY,
        )
        .await
        .unwrap_err();

        assert!(!err.is_operation_not_done());
        assert_eq!(operator.seen_tokens.lock().unwrap().len(), 3);
        let condition = conditions::get(&cluster, PUBLIC_IPS_READY).unwrap();
        assert_eq!(condition.reason.as_deref(), Some(reasons::FAILED));
        assert_eq!(condition.severity, Some(ConditionSeverity::Error));
        assert!(lro::get(&cluster, "pip-1", "publicips", FutureType::Create).is_some());
        assert!(lro::get(&cluster, "pip-2", "publicips", FutureType::Create).is_none());
    }

    #[tokio::test]
    async fn test_failed_operation_clears_future() {
        let mut cluster = AzureCluster::new("c", Default::default());
        let operator = ScriptedOperator::new(&[(
            "pip-1",
            vec![Ok(OperationStatus::InProgress("t".to_string())), Err("boom".to_string())],
        )]);

        let _ = delete_all(&mut cluster, &operator, &[pip("pip-1")], PUBLIC_IPS_READY).await;
        assert!(lro::get(&cluster, "pip-1", "publicips", FutureType::Delete).is_some());

        let _ = delete_all(&mut cluster, &operator, &[pip("pip-1")], PUBLIC_IPS_READY).await;
        assert!(lro::get(&cluster, "pip-1", "publicips", FutureType::Delete).is_none());
        assert_eq!(
            conditions::get(&cluster, PUBLIC_IPS_READY).and_then(|c| c.reason.as_deref()),
            Some(reasons::DELETION_FAILED)
        );
    }
}
