//! Cluster API style status conditions
//!
//! Every Azure CRD status carries a list of conditions. The helpers here
//! keep `lastTransitionTime` stable when a condition is re-set with the same
//! status, which is what consumers use to measure how long a condition held.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type
pub type ConditionType = &'static str;

/// Summary condition computed from every other condition on close.
pub const READY: ConditionType = "Ready";
/// Resource group reconciled
pub const RESOURCE_GROUP_READY: ConditionType = "ResourceGroupReady";
/// Route tables reconciled
pub const ROUTE_TABLES_READY: ConditionType = "RouteTablesReady";
/// Overall network infrastructure reconciled
pub const NETWORK_INFRASTRUCTURE_READY: ConditionType = "NetworkInfrastructureReady";
/// VNet peerings reconciled
pub const VNET_PEERING_READY: ConditionType = "VnetPeeringReady";
/// Disks reconciled
pub const DISKS_READY: ConditionType = "DisksReady";
/// NAT gateways reconciled
pub const NAT_GATEWAYS_READY: ConditionType = "NATGatewaysReady";
/// Load balancers reconciled
pub const LOAD_BALANCERS_READY: ConditionType = "LoadBalancersReady";
/// Bastion host reconciled
pub const BASTION_HOST_READY: ConditionType = "BastionHostReady";
/// Virtual network reconciled
pub const VNET_READY: ConditionType = "VNetReady";
/// Subnets reconciled
pub const SUBNETS_READY: ConditionType = "SubnetsReady";
/// Network security groups reconciled
pub const SECURITY_GROUPS_READY: ConditionType = "SecurityGroupsReady";
/// Private DNS zone reconciled
pub const PRIVATE_DNS_ZONE_READY: ConditionType = "PrivateDNSZoneReady";
/// Private DNS links reconciled
pub const PRIVATE_DNS_LINK_READY: ConditionType = "PrivateDNSLinkReady";
/// Private DNS records reconciled
pub const PRIVATE_DNS_RECORD_READY: ConditionType = "PrivateDNSRecordReady";
/// Public IPs reconciled
pub const PUBLIC_IPS_READY: ConditionType = "PublicIPsReady";
/// Managed cluster reconciled
pub const MANAGED_CLUSTER_RUNNING: ConditionType = "ManagedClusterRunning";
/// Agent pools reconciled
pub const AGENT_POOLS_READY: ConditionType = "AgentPoolsReady";

/// Scale set is running
pub const SCALE_SET_RUNNING: ConditionType = "ScaleSetRunning";
/// Scale set instances run the latest model
pub const SCALE_SET_MODEL_UPDATED: ConditionType = "ScaleSetModelUpdated";
/// Scale set has the desired number of replicas
pub const SCALE_SET_DESIRED_REPLICAS: ConditionType = "ScaleSetDesiredReplicas";

/// Instance VM is running
pub const VM_RUNNING: ConditionType = "VMRunning";
/// Workload node backing the instance is healthy
pub const MACHINE_NODE_HEALTHY: ConditionType = "NodeHealthy";
/// Node drain finished before deletion
pub const DRAINING_SUCCEEDED: ConditionType = "DrainingSucceeded";

/// Conditions the cluster patch helper owns when it flushes on close.
pub const CLUSTER_OWNED_CONDITIONS: &[ConditionType] = &[
    READY,
    RESOURCE_GROUP_READY,
    ROUTE_TABLES_READY,
    NETWORK_INFRASTRUCTURE_READY,
    VNET_PEERING_READY,
    DISKS_READY,
    NAT_GATEWAYS_READY,
    LOAD_BALANCERS_READY,
    BASTION_HOST_READY,
    VNET_READY,
    SUBNETS_READY,
    SECURITY_GROUPS_READY,
    PRIVATE_DNS_ZONE_READY,
    PRIVATE_DNS_LINK_READY,
    PRIVATE_DNS_RECORD_READY,
];

/// Well-known condition reasons
pub mod reasons {
    /// Resource is being created
    pub const CREATING: &str = "Creating";
    /// Resource is being updated
    pub const UPDATING: &str = "Updating";
    /// Resource is being deleted
    pub const DELETING: &str = "Deleting";
    /// Resource was deleted
    pub const DELETED: &str = "Deleted";
    /// Create or update failed
    pub const FAILED: &str = "Failed";
    /// Delete failed
    pub const DELETION_FAILED: &str = "DeletionFailed";
    /// Credentials could not be resolved
    pub const AUTH_FAILED: &str = "AuthFailed";
    /// Scale set needs more instances
    pub const SCALE_UP: &str = "ScaleUp";
    /// Scale set has too many instances
    pub const SCALE_DOWN: &str = "ScaleDown";
    /// Scale set model changed since instances were reconciled
    pub const MODEL_OUT_OF_DATE: &str = "ModelOutOfDate";
    /// Node has not registered yet
    pub const NODE_PROVISIONING: &str = "NodeProvisioning";
    /// Node reports an unhealthy condition
    pub const NODE_CONDITIONS_FAILED: &str = "NodeConditionsFailed";
    /// Node was seen before and has since disappeared
    pub const NODE_NOT_FOUND: &str = "NodeNotFound";
    /// Draining the node failed
    pub const DRAINING_FAILED: &str = "DrainingFailed";
}

/// Condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not determined yet
    #[default]
    Unknown,
}

/// How bad a `False` condition is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConditionSeverity {
    /// Blocking failure
    Error,
    /// Degraded, may recover
    Warning,
    /// Expected transient state
    Info,
}

/// A single observation on the resource state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "Ready", "SubnetsReady")
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Only set for `False` conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Last time the status flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// CamelCase machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    /// Build a `True` condition
    pub fn true_condition(type_: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            severity: None,
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }

    /// Build a `False` condition
    pub fn false_condition(
        type_: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity),
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: if message.is_empty() { None } else { Some(message) },
        }
    }

    /// Build an `Unknown` condition
    pub fn unknown_condition(type_: &str, reason: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::Unknown,
            severity: None,
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: if message.is_empty() { None } else { Some(message) },
        }
    }

    /// Same status, severity, reason and message (timestamps ignored)
    pub fn has_same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Objects that carry a condition list in their status.
pub trait Conditioned {
    /// Current conditions (empty when status is unset)
    fn conditions(&self) -> &[Condition];

    /// Mutable conditions, creating the status on demand
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// Get a condition by type
pub fn get<'a>(obj: &'a dyn Conditioned, type_: &str) -> Option<&'a Condition> {
    obj.conditions().iter().find(|c| c.type_ == type_)
}

/// True when the condition exists with status True
pub fn is_true(obj: &dyn Conditioned, type_: &str) -> bool {
    get(obj, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// True when the condition exists with status False
pub fn is_false(obj: &dyn Conditioned, type_: &str) -> bool {
    get(obj, type_).is_some_and(|c| c.status == ConditionStatus::False)
}

/// Set a condition, keeping `lastTransitionTime` when the status did not change.
///
/// Conditions are kept sorted with `Ready` first and the rest by type so
/// repeated patches produce identical lists.
pub fn set(obj: &mut dyn Conditioned, mut condition: Condition) {
    let conditions = obj.conditions_mut();
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                if existing.has_same_state(&condition) {
                    return;
                }
                condition.last_transition_time = existing.last_transition_time;
            } else {
                condition.last_transition_time = Some(Utc::now());
            }
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(Utc::now());
            conditions.push(condition);
        }
    }
    conditions.sort_by(|a, b| {
        let rank = |c: &Condition| if c.type_ == READY { 0 } else { 1 };
        rank(a).cmp(&rank(b)).then_with(|| a.type_.cmp(&b.type_))
    });
}

/// Mark a condition True
pub fn mark_true(obj: &mut dyn Conditioned, type_: &str) {
    set(obj, Condition::true_condition(type_));
}

/// Mark a condition False
pub fn mark_false(
    obj: &mut dyn Conditioned,
    type_: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) {
    set(obj, Condition::false_condition(type_, reason, severity, message));
}

/// Remove a condition
pub fn delete(obj: &mut dyn Conditioned, type_: &str) {
    obj.conditions_mut().retain(|c| c.type_ != type_);
}
