//! Rolling update instance selection
//!
//! Decides which pool machines to delete when a scale set has more
//! instances than desired, spending at most the larger of the
//! over-provisioned count and the max-unavailable budget.

use std::cmp::Reverse;

use crds::azure_machine_pool::{DeletePolicy, IntOrString, MachineRollingUpdateDeployment, ProvisioningState};
use crds::cluster_api::DELETE_MACHINE_ANNOTATION;
use crds::AzureMachinePoolMachine;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::error::ScopeError;

/// Resolved rolling update parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingUpdateStrategy {
    pub max_surge: IntOrString,
    pub max_unavailable: IntOrString,
    pub delete_policy: DeletePolicy,
    /// Seed for the `Random` policy; `None` uses the thread RNG
    pub seed: Option<u64>,
}

impl Default for RollingUpdateStrategy {
    fn default() -> Self {
        Self {
            max_surge: IntOrString::Int(1),
            max_unavailable: IntOrString::Int(0),
            delete_policy: DeletePolicy::Oldest,
            seed: None,
        }
    }
}

impl From<&MachineRollingUpdateDeployment> for RollingUpdateStrategy {
    fn from(deployment: &MachineRollingUpdateDeployment) -> Self {
        let defaults = Self::default();
        Self {
            max_surge: deployment.max_surge.clone().unwrap_or(defaults.max_surge),
            max_unavailable: deployment.max_unavailable.clone().unwrap_or(defaults.max_unavailable),
            delete_policy: deployment.delete_policy,
            seed: None,
        }
    }
}

/// Resolve an int-or-percent against `total`
fn scaled_value(value: &IntOrString, total: i32, round_up: bool) -> Result<i32, ScopeError> {
    match value {
        IntOrString::Int(i) => Ok(*i),
        IntOrString::String(s) => {
            let percent: i64 = s
                .strip_suffix('%')
                .and_then(|p| p.trim().parse().ok())
                .ok_or_else(|| ScopeError::InvalidInput(format!("invalid percentage {s:?}")))?;
            let scaled = i64::from(total) * percent;
            let value = if round_up { (scaled + 99).div_euclid(100) } else { scaled.div_euclid(100) };
            i32::try_from(value).map_err(|_| ScopeError::InvalidInput(format!("percentage {s:?} out of range")))
        }
    }
}

fn is_annotated_for_delete(machine: &AzureMachinePoolMachine) -> bool {
    machine
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(DELETE_MACHINE_ANNOTATION))
}

fn is_deleting_in_cloud(machine: &AzureMachinePoolMachine) -> bool {
    machine.metadata.deletion_timestamp.is_none()
        && machine
            .status
            .as_ref()
            .is_some_and(|s| s.provisioning_state == Some(ProvisioningState::Deleting))
}

fn is_latest_model(machine: &AzureMachinePoolMachine) -> bool {
    machine.status.as_ref().is_some_and(|s| s.latest_model_applied)
}

fn name_of(machine: &AzureMachinePoolMachine) -> &str {
    machine.metadata.name.as_deref().unwrap_or_default()
}

impl RollingUpdateStrategy {
    /// Instances allowed above `desired`; percentages round up
    pub fn surge(&self, desired: i32) -> Result<i32, ScopeError> {
        scaled_value(&self.max_surge, desired, true)
    }

    /// Instances allowed to be unavailable; percentages round down
    pub fn max_unavailable(&self, desired: i32) -> Result<i32, ScopeError> {
        scaled_value(&self.max_unavailable, desired, false)
    }

    fn order_by_policy(&self, candidates: &mut [AzureMachinePoolMachine]) {
        match self.delete_policy {
            DeletePolicy::Oldest => candidates.sort_by(|a, b| {
                a.metadata
                    .creation_timestamp
                    .cmp(&b.metadata.creation_timestamp)
                    .then_with(|| name_of(a).cmp(name_of(b)))
            }),
            DeletePolicy::Newest => candidates.sort_by(|a, b| {
                b.metadata
                    .creation_timestamp
                    .cmp(&a.metadata.creation_timestamp)
                    .then_with(|| name_of(a).cmp(name_of(b)))
            }),
            DeletePolicy::Random => match self.seed {
                Some(seed) => candidates.shuffle(&mut StdRng::seed_from_u64(seed)),
                None => candidates.shuffle(&mut rand::thread_rng()),
            },
        }
    }

    /// Machines to delete so the pool converges on `desired`.
    ///
    /// Records already carrying a deletion timestamp count against the
    /// budget and are never returned. Within the budget, delete-annotated
    /// machines go first, then machines Azure is already deleting, then
    /// machines on an old model, each group ordered by the delete policy.
    pub fn select_machines_to_delete(
        &self,
        desired: i32,
        machines: &[AzureMachinePoolMachine],
    ) -> Result<Vec<AzureMachinePoolMachine>, ScopeError> {
        let total = i32::try_from(machines.len())
            .map_err(|_| ScopeError::InvalidInput("too many machines".to_string()))?;
        if total <= desired {
            return Ok(Vec::new());
        }

        let over_provisioned = total - desired;
        let out_of_date = machines.iter().filter(|m| !is_latest_model(m)).count() as i32;
        let already_deleting = machines
            .iter()
            .filter(|m| m.metadata.deletion_timestamp.is_some())
            .count() as i32;
        let max_unavailable = self.max_unavailable(desired)?;

        let to_select = over_provisioned.min(out_of_date.max(max_unavailable) - already_deleting);
        debug!(
            desired,
            total, over_provisioned, out_of_date, already_deleting, max_unavailable, to_select, "rolling update budget"
        );
        if to_select <= 0 {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<AzureMachinePoolMachine> = machines
            .iter()
            .filter(|m| m.metadata.deletion_timestamp.is_none())
            .cloned()
            .collect();
        self.order_by_policy(&mut candidates);
        candidates.sort_by_key(|m| {
            (
                Reverse(is_annotated_for_delete(m)),
                Reverse(is_deleting_in_cloud(m)),
                is_latest_model(m),
            )
        });
        candidates.truncate(to_select as usize);

        if !candidates.is_empty() {
            info!(
                "Selected {} machines for deletion: {:?}",
                candidates.len(),
                candidates.iter().map(name_of).collect::<Vec<_>>()
            );
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn machine(name: &str, created: &str, latest: bool) -> AzureMachinePoolMachine {
        serde_json::from_value(json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
            "kind": "AzureMachinePoolMachine",
            "metadata": {"name": name, "namespace": "default", "creationTimestamp": created},
            "spec": {"providerID": format!("azure:///{name}"), "instanceID": name},
            "status": {"latestModelApplied": latest, "ready": true}
        }))
        .unwrap()
    }

    fn names(machines: &[AzureMachinePoolMachine]) -> Vec<&str> {
        machines.iter().map(name_of).collect()
    }

    #[test]
    fn test_surge_and_max_unavailable_rounding() {
        let strategy = RollingUpdateStrategy {
            max_surge: IntOrString::String("25%".to_string()),
            max_unavailable: IntOrString::String("25%".to_string()),
            ..Default::default()
        };
        assert_eq!(strategy.surge(3).unwrap(), 1);
        assert_eq!(strategy.max_unavailable(3).unwrap(), 0);
        assert_eq!(strategy.surge(10).unwrap(), 3);
        assert_eq!(strategy.max_unavailable(10).unwrap(), 2);

        let defaults = RollingUpdateStrategy::default();
        assert_eq!(defaults.surge(5).unwrap(), 1);
        assert_eq!(defaults.max_unavailable(5).unwrap(), 0);
    }

    #[test]
    fn test_invalid_percentage() {
        let strategy = RollingUpdateStrategy {
            max_unavailable: IntOrString::String("lots".to_string()),
            ..Default::default()
        };
        assert!(strategy.max_unavailable(3).is_err());
    }

    #[test]
    fn test_not_over_provisioned_selects_nothing() {
        let machines = vec![
            machine("foo", "2024-01-01T00:00:00Z", false),
            machine("bar", "2024-01-02T00:00:00Z", false),
        ];
        let selected = RollingUpdateStrategy::default()
            .select_machines_to_delete(2, &machines)
            .unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn test_over_provisioned_deletes_out_of_date_model() {
        let machines = vec![
            machine("foo", "2024-01-01T00:00:00Z", true),
            machine("bin", "2024-01-02T00:00:00Z", true),
            machine("baz", "2024-01-03T00:00:00Z", false),
        ];
        let selected = RollingUpdateStrategy::default()
            .select_machines_to_delete(2, &machines)
            .unwrap();
        assert_eq!(names(&selected), vec!["baz"]);
    }

    #[test]
    fn test_oldest_policy_with_full_unavailability_prefers_delete_annotation() {
        let mut machines = vec![
            machine("oldest", "2024-01-01T00:00:00Z", true),
            machine("old", "2024-01-02T00:00:00Z", true),
            machine("new", "2024-01-03T00:00:00Z", true),
            machine("newest", "2024-01-04T00:00:00Z", true),
        ];
        machines[2].metadata.annotations = Some(
            [(DELETE_MACHINE_ANNOTATION.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        );
        let strategy = RollingUpdateStrategy {
            max_unavailable: IntOrString::String("100%".to_string()),
            delete_policy: DeletePolicy::Oldest,
            ..Default::default()
        };

        let selected = strategy.select_machines_to_delete(2, &machines).unwrap();
        assert_eq!(names(&selected), vec!["new", "oldest"]);
    }

    #[test]
    fn test_default_strategy_only_reaps_surged_out_of_date_machines() {
        let mut machines = vec![
            machine("oldest", "2024-01-01T00:00:00Z", true),
            machine("old", "2024-01-02T00:00:00Z", true),
            machine("new", "2024-01-03T00:00:00Z", true),
            machine("surge", "2024-01-04T00:00:00Z", true),
        ];
        let strategy = RollingUpdateStrategy::default();

        // Every machine is current and nothing may go unavailable
        assert!(strategy.select_machines_to_delete(2, &machines).unwrap().is_empty());

        // The surge machine came up on the new model; the stale one it replaces goes
        machines[1].status.as_mut().unwrap().latest_model_applied = false;
        let selected = strategy.select_machines_to_delete(3, &machines).unwrap();
        assert_eq!(names(&selected), vec!["old"]);
    }

    #[test]
    fn test_newest_policy() {
        let machines = vec![
            machine("a", "2024-01-01T00:00:00Z", true),
            machine("b", "2024-01-02T00:00:00Z", true),
            machine("c", "2024-01-03T00:00:00Z", true),
        ];
        let strategy = RollingUpdateStrategy {
            max_unavailable: IntOrString::Int(1),
            delete_policy: DeletePolicy::Newest,
            ..Default::default()
        };
        let selected = strategy.select_machines_to_delete(2, &machines).unwrap();
        assert_eq!(names(&selected), vec!["c"]);
    }

    #[test]
    fn test_cloud_deleting_is_reaped_and_already_deleting_counts() {
        let mut machines = vec![
            machine("a", "2024-01-01T00:00:00Z", false),
            machine("b", "2024-01-02T00:00:00Z", true),
            machine("c", "2024-01-03T00:00:00Z", true),
            machine("d", "2024-01-04T00:00:00Z", false),
        ];
        machines[2].status.as_mut().unwrap().provisioning_state = Some(ProvisioningState::Deleting);
        machines[3].metadata.deletion_timestamp = machines[3].metadata.creation_timestamp.clone();

        // over = 2, out of date = 2, already deleting = 1 => select 1
        let selected = RollingUpdateStrategy::default()
            .select_machines_to_delete(2, &machines)
            .unwrap();
        assert_eq!(names(&selected), vec!["c"]);
    }

    #[test]
    fn test_random_policy_is_reproducible_with_seed() {
        let machines: Vec<_> = (0..6)
            .map(|i| machine(&format!("m{i}"), "2024-01-01T00:00:00Z", true))
            .collect();
        let strategy = RollingUpdateStrategy {
            max_unavailable: IntOrString::Int(3),
            delete_policy: DeletePolicy::Random,
            seed: Some(7),
            ..Default::default()
        };

        let first = strategy.select_machines_to_delete(3, &machines).unwrap();
        let second = strategy.select_machines_to_delete(3, &machines).unwrap();
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_selection_stays_within_budget() {
        let machines: Vec<_> = (0..5)
            .map(|i| machine(&format!("m{i}"), &format!("2024-01-0{}T00:00:00Z", i + 1), i % 2 == 0))
            .collect();
        for desired in 0..6 {
            for unavailable in 0..6 {
                let strategy = RollingUpdateStrategy {
                    max_unavailable: IntOrString::Int(unavailable),
                    ..Default::default()
                };
                let selected = strategy.select_machines_to_delete(desired, &machines).unwrap();
                let bound = (machines.len() as i32 - desired).max(unavailable);
                assert!(selected.len() as i32 <= bound);
                assert!(selected.iter().all(|s| machines.iter().any(|m| name_of(m) == name_of(s))));
            }
        }
    }
}
