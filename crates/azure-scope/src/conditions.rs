//! Condition summary and operation status updaters
//!
//! The updaters map the outcome of an Azure operation onto one condition:
//! success, still running (Info severity, future kept) or failed (Error
//! severity, future cleared).

use crds::conditions::{
    self, Condition, ConditionSeverity, ConditionStatus, Conditioned, READY, reasons,
};

use crate::error::OperationError;

/// Merge priority of a condition; lower sorts first
fn merge_priority(condition: &Condition) -> u8 {
    match (condition.status, condition.severity) {
        (ConditionStatus::False, Some(ConditionSeverity::Error)) => 0,
        (ConditionStatus::False, Some(ConditionSeverity::Warning)) => 1,
        (ConditionStatus::False, _) => 2,
        (ConditionStatus::True, _) => 3,
        (ConditionStatus::Unknown, _) => 4,
    }
}

/// Compute `Ready` from the conditions in `owned` (excluding `Ready` itself).
///
/// The worst condition wins: False/Error, then False/Warning, then
/// False/Info, then True, then Unknown. Reason and message come from the
/// first condition of the winning group. With no source conditions `Ready`
/// is left untouched.
pub fn set_summary(obj: &mut dyn Conditioned, owned: &[&str]) {
    let winner = obj
        .conditions()
        .iter()
        .filter(|c| c.type_ != READY && owned.contains(&c.type_.as_str()))
        .min_by_key(|c| merge_priority(c))
        .cloned();

    let Some(winner) = winner else {
        return;
    };

    let summary = match winner.status {
        ConditionStatus::True => Condition::true_condition(READY),
        ConditionStatus::False => Condition::false_condition(
            READY,
            winner.reason.as_deref().unwrap_or_default(),
            winner.severity.unwrap_or(ConditionSeverity::Info),
            winner.message.unwrap_or_default(),
        ),
        ConditionStatus::Unknown => Condition::unknown_condition(
            READY,
            winner.reason.as_deref().unwrap_or_default(),
            winner.message.unwrap_or_default(),
        ),
    };
    conditions::set(obj, summary);
}

/// Update a condition after a create-or-update (PUT)
pub fn update_put_status(obj: &mut dyn Conditioned, condition: &str, service: &str, result: Option<&OperationError>) {
    match result {
        None => conditions::mark_true(obj, condition),
        Some(err) if err.is_operation_not_done() => conditions::mark_false(
            obj,
            condition,
            reasons::CREATING,
            ConditionSeverity::Info,
            format!("{service} creating or updating"),
        ),
        Some(err) => conditions::mark_false(
            obj,
            condition,
            reasons::FAILED,
            ConditionSeverity::Error,
            format!("{service} failed to create or update. err: {err}"),
        ),
    }
}

/// Update a condition after an in-place update (PATCH)
pub fn update_patch_status(obj: &mut dyn Conditioned, condition: &str, service: &str, result: Option<&OperationError>) {
    match result {
        None => conditions::mark_true(obj, condition),
        Some(err) if err.is_operation_not_done() => conditions::mark_false(
            obj,
            condition,
            reasons::UPDATING,
            ConditionSeverity::Info,
            format!("{service} updating"),
        ),
        Some(err) => conditions::mark_false(
            obj,
            condition,
            reasons::FAILED,
            ConditionSeverity::Error,
            format!("{service} failed to update. err: {err}"),
        ),
    }
}

/// Update a condition after a delete
pub fn update_delete_status(obj: &mut dyn Conditioned, condition: &str, service: &str, result: Option<&OperationError>) {
    match result {
        None => conditions::mark_false(
            obj,
            condition,
            reasons::DELETED,
            ConditionSeverity::Info,
            format!("{service} successfully deleted"),
        ),
        Some(err) if err.is_operation_not_done() => conditions::mark_false(
            obj,
            condition,
            reasons::DELETING,
            ConditionSeverity::Info,
            format!("{service} deleting"),
        ),
        Some(err) => conditions::mark_false(
            obj,
            condition,
            reasons::DELETION_FAILED,
            ConditionSeverity::Error,
            format!("{service} failed to delete. err: {err}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::conditions::{LOAD_BALANCERS_READY, SUBNETS_READY, VNET_READY};
    use crds::futures::{Future, FutureType};

    #[derive(Default)]
    struct Holder(Vec<Condition>);

    impl Conditioned for Holder {
        fn conditions(&self) -> &[Condition] {
            &self.0
        }
        fn conditions_mut(&mut self) -> &mut Vec<Condition> {
            &mut self.0
        }
    }

    const OWNED: &[&str] = &[READY, VNET_READY, SUBNETS_READY, LOAD_BALANCERS_READY];

    fn not_done() -> OperationError {
        OperationError::NotDone(Future {
            type_: FutureType::Create,
            service_name: "virtualnetworks".to_string(),
            name: "vnet".to_string(),
            resource_group: "rg".to_string(),
            data: "token".to_string(),
        })
    }

    #[test]
    fn test_summary_without_sources_leaves_ready_alone() {
        let mut holder = Holder::default();
        set_summary(&mut holder, OWNED);
        assert!(conditions::get(&holder, READY).is_none());
    }

    #[test]
    fn test_summary_error_beats_info() {
        let mut holder = Holder::default();
        conditions::mark_true(&mut holder, SUBNETS_READY);
        update_put_status(&mut holder, VNET_READY, "virtualnetworks", Some(&not_done()));
        let failed = OperationError::Failed {
            service: "loadbalancers".to_string(),
            name: "lb".to_string(),
            message: "quota exceeded".to_string(),
        };
        update_put_status(&mut holder, LOAD_BALANCERS_READY, "loadbalancers", Some(&failed));

        set_summary(&mut holder, OWNED);
        let ready = conditions::get(&holder, READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.severity, Some(ConditionSeverity::Error));
        assert_eq!(ready.reason.as_deref(), Some(reasons::FAILED));
    }

    #[test]
    fn test_summary_all_true() {
        let mut holder = Holder::default();
        conditions::mark_true(&mut holder, SUBNETS_READY);
        conditions::mark_true(&mut holder, VNET_READY);
        set_summary(&mut holder, OWNED);
        assert!(conditions::is_true(&holder, READY));
    }

    #[test]
    fn test_delete_status_reasons() {
        let mut holder = Holder::default();
        update_delete_status(&mut holder, VNET_READY, "virtualnetworks", Some(&not_done()));
        assert_eq!(
            conditions::get(&holder, VNET_READY).and_then(|c| c.reason.as_deref()),
            Some(reasons::DELETING)
        );

        update_delete_status(&mut holder, VNET_READY, "virtualnetworks", None);
        let c = conditions::get(&holder, VNET_READY).unwrap();
        assert_eq!(c.reason.as_deref(), Some(reasons::DELETED));
        assert_eq!(c.severity, Some(ConditionSeverity::Info));
    }

    #[test]
    fn test_patch_status_not_done_is_updating() {
        let mut holder = Holder::default();
        update_patch_status(&mut holder, VNET_READY, "virtualnetworks", Some(&not_done()));
        assert_eq!(
            conditions::get(&holder, VNET_READY).and_then(|c| c.reason.as_deref()),
            Some(reasons::UPDATING)
        );
    }
}
