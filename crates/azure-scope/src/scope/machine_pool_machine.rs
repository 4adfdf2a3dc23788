//! Scope for one scale set instance record
//!
//! Binds an AzureMachinePoolMachine to the workload cluster Node running on
//! the instance, and cordons and drains that node before the instance goes.

use std::sync::Arc;
use std::time::Duration;

use crds::azure_machine_pool::ProvisioningState;
use crds::cluster_api::EXCLUDE_NODE_DRAINING_ANNOTATION;
use crds::conditions::{
    self, ConditionSeverity, DRAINING_SUCCEEDED, MACHINE_NODE_HEALTHY, READY, VM_RUNNING, reasons,
};
use crds::futures::{Future, FutureType};
use crds::{AzureMachinePool, AzureMachinePoolMachine, ObjectReference};
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::{debug, info, warn};

use crate::conditions::{set_summary, update_delete_status, update_put_status};
use crate::error::{OperationError, ScopeError};
use crate::lro;
use crate::names;
use crate::patch::PatchHelper;
use crate::scope::{ClusterScoper, ScaleSetInstance};
use crate::scope_trait::{NodeClient, ObjectKind, ScopeClient};

/// Conditions summarised into `Ready` on close
const OWNED_CONDITIONS: &[&str] = &[READY, VM_RUNNING, MACHINE_NODE_HEALTHY];

/// Annotation the kubelet puts on static pod mirrors
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Inputs of [`MachinePoolMachineScope::new`]
pub struct MachinePoolMachineScopeParams {
    pub client: Arc<dyn ScopeClient>,
    pub cluster: Arc<dyn ClusterScoper>,
    /// Pool owning the machine
    pub azure_machine_pool: AzureMachinePool,
    pub machine: AzureMachinePoolMachine,
}

/// Per-pass scope over an AzureMachinePoolMachine
pub struct MachinePoolMachineScope {
    client: Arc<dyn ScopeClient>,
    cluster: Arc<dyn ClusterScoper>,
    patch_helper: PatchHelper,
    workload: Option<Arc<dyn NodeClient>>,
    instance: Option<ScaleSetInstance>,
    pub azure_machine_pool: AzureMachinePool,
    pub machine: AzureMachinePoolMachine,
}

fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

fn node_provider_id(node: &Node) -> &str {
    node.spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .unwrap_or_default()
}

/// DaemonSet pods come straight back and mirror pods cannot be evicted
fn is_evictable(pod: &Pod) -> bool {
    let is_mirror = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION));
    let is_daemon_set = pod
        .metadata
        .owner_references
        .iter()
        .flatten()
        .any(|o| o.kind == "DaemonSet");
    !is_mirror && !is_daemon_set
}

impl MachinePoolMachineScope {
    pub fn new(params: MachinePoolMachineScopeParams) -> Result<Self, ScopeError> {
        let patch_helper = PatchHelper::new(ObjectKind::AzureMachinePoolMachine, &params.machine)?;
        Ok(Self {
            client: params.client,
            cluster: params.cluster,
            patch_helper,
            workload: None,
            instance: None,
            azure_machine_pool: params.azure_machine_pool,
            machine: params.machine,
        })
    }

    pub fn name(&self) -> &str {
        self.machine.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.machine.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn provider_id(&self) -> &str {
        &self.machine.spec.provider_id
    }

    async fn workload(&mut self) -> Result<Arc<dyn NodeClient>, ScopeError> {
        if let Some(client) = &self.workload {
            return Ok(Arc::clone(client));
        }
        let client = self
            .client
            .workload_cluster_client(self.namespace(), self.cluster.cluster_name())
            .await?;
        self.workload = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Node behind this machine, by node ref when known, else by provider ID
    async fn find_node(&mut self) -> Result<Option<Node>, ScopeError> {
        let workload = self.workload().await?;
        let node_ref = self
            .machine
            .status
            .as_ref()
            .and_then(|s| s.node_ref.as_ref())
            .filter(|r| !r.name.is_empty())
            .map(|r| r.name.clone());

        if let Some(name) = node_ref {
            return workload.get_node(&name).await;
        }
        let provider_id = self.provider_id();
        Ok(workload
            .list_nodes()
            .await?
            .into_iter()
            .find(|n| names::provider_ids_match(node_provider_id(n), provider_id)))
    }

    /// Record what Azure reports for the instance
    pub fn set_instance(&mut self, instance: ScaleSetInstance) {
        let status = self.machine.status.get_or_insert_with(Default::default);
        status.provisioning_state = Some(instance.state.clone());
        status.latest_model_applied = instance.latest_model_applied;
        status.instance_name = instance.name.clone();

        let machine = &mut self.machine;
        match &instance.state {
            ProvisioningState::Succeeded => conditions::mark_true(machine, VM_RUNNING),
            ProvisioningState::Creating => {
                conditions::mark_false(machine, VM_RUNNING, reasons::CREATING, ConditionSeverity::Info, "");
            }
            ProvisioningState::Deleting => {
                conditions::mark_false(machine, VM_RUNNING, reasons::DELETING, ConditionSeverity::Info, "");
            }
            ProvisioningState::Failed => conditions::mark_false(
                machine,
                VM_RUNNING,
                reasons::FAILED,
                ConditionSeverity::Error,
                format!("instance {} failed to provision", instance.instance_id),
            ),
            other => conditions::mark_false(machine, VM_RUNNING, other.as_str(), ConditionSeverity::Info, ""),
        }
        self.instance = Some(instance);
    }

    pub fn instance(&self) -> Option<&ScaleSetInstance> {
        self.instance.as_ref()
    }

    /// Copy readiness, kubelet version and node ref from the workload Node
    pub async fn update_node_status(&mut self) -> Result<(), ScopeError> {
        let had_node_ref = self.machine.status.as_ref().is_some_and(|s| s.node_ref.is_some());
        let node = self.find_node().await?;

        let Some(node) = node else {
            let (reason, severity) = if had_node_ref {
                (reasons::NODE_NOT_FOUND, ConditionSeverity::Warning)
            } else {
                (reasons::NODE_PROVISIONING, ConditionSeverity::Info)
            };
            debug!(machine = %self.name(), provider_id = %self.provider_id(), reason, "no node for machine");
            conditions::mark_false(&mut self.machine, MACHINE_NODE_HEALTHY, reason, severity, "");
            self.machine.status.get_or_insert_with(Default::default).ready = false;
            return Ok(());
        };

        let ready = is_node_ready(&node);
        let node_name = node.metadata.name.clone().unwrap_or_default();
        let status = self.machine.status.get_or_insert_with(Default::default);
        status.node_ref = Some(ObjectReference {
            api_version: Some("v1".to_string()),
            uid: node.metadata.uid.clone(),
            ..ObjectReference::new("Node", node_name.clone())
        });
        status.ready = ready;
        status.version = node
            .status
            .as_ref()
            .and_then(|s| s.node_info.as_ref())
            .map(|i| i.kubelet_version.clone())
            .unwrap_or_default();

        if ready {
            conditions::mark_true(&mut self.machine, MACHINE_NODE_HEALTHY);
        } else {
            conditions::mark_false(
                &mut self.machine,
                MACHINE_NODE_HEALTHY,
                reasons::NODE_CONDITIONS_FAILED,
                ConditionSeverity::Warning,
                format!("node {node_name} is not ready"),
            );
        }
        Ok(())
    }

    async fn drain(workload: &dyn NodeClient, node: &str) -> Result<(), ScopeError> {
        workload.cordon_node(node).await?;
        for pod in workload.list_pods_on_node(node).await? {
            if !is_evictable(&pod) {
                continue;
            }
            let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            debug!(node, pod = %name, namespace, "evicting pod");
            workload.evict_pod(namespace, name).await?;
        }
        Ok(())
    }

    /// Cordon the node and evict its pods before the instance is deleted.
    ///
    /// Skipped when the machine carries the exclude-draining annotation or
    /// has no node. The outcome is recorded in `DrainingSucceeded`.
    pub async fn cordon_and_drain(&mut self) -> Result<(), ScopeError> {
        let excluded = self
            .machine
            .metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(EXCLUDE_NODE_DRAINING_ANNOTATION));
        if excluded {
            info!(machine = %self.name(), "node draining excluded by annotation");
            return Ok(());
        }

        let Some(node) = self.find_node().await? else {
            debug!(machine = %self.name(), "no node to drain");
            return Ok(());
        };
        let node_name = node.metadata.name.clone().unwrap_or_default();
        let workload = self.workload().await?;

        let timeout = self.azure_machine_pool.spec.node_drain_timeout_seconds.filter(|s| *s > 0);
        let drained = match timeout {
            Some(seconds) => {
                let limit = Duration::from_secs(seconds.unsigned_abs());
                tokio::time::timeout(limit, Self::drain(workload.as_ref(), &node_name))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ScopeError::DrainTimeout {
                            node: node_name.clone(),
                            seconds,
                        })
                    })
            }
            None => Self::drain(workload.as_ref(), &node_name).await,
        };

        match drained {
            Ok(()) => {
                info!(machine = %self.name(), node = %node_name, "drained node");
                conditions::mark_true(&mut self.machine, DRAINING_SUCCEEDED);
                Ok(())
            }
            Err(e) => {
                warn!(machine = %self.name(), node = %node_name, error = %e, "failed to drain node");
                conditions::mark_false(
                    &mut self.machine,
                    DRAINING_SUCCEEDED,
                    reasons::DRAINING_FAILED,
                    ConditionSeverity::Warning,
                    e.to_string(),
                );
                Err(e)
            }
        }
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.machine.status.get_or_insert_with(Default::default).ready = ready;
    }

    /// Terminal failure the machine cannot recover from on its own
    pub fn set_failure(&mut self, reason: &str, message: impl Into<String>) {
        let status = self.machine.status.get_or_insert_with(Default::default);
        status.failure_reason = Some(reason.to_string());
        status.failure_message = Some(message.into());
    }

    pub fn set_long_running_operation_state(&mut self, future: Future) {
        lro::set(&mut self.machine, future);
    }

    pub fn get_long_running_operation_state(&self, name: &str, service: &str, type_: FutureType) -> Option<Future> {
        lro::get(&self.machine, name, service, type_).cloned()
    }

    pub fn delete_long_running_operation_state(&mut self, name: &str, service: &str, type_: FutureType) {
        lro::delete(&mut self.machine, name, service, type_);
    }

    pub fn update_put_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_put_status(&mut self.machine, condition, service, err);
    }

    pub fn update_delete_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_delete_status(&mut self.machine, condition, service, err);
    }

    /// Summarise conditions and patch the AzureMachinePoolMachine
    pub async fn close(mut self) -> Result<(), ScopeError> {
        set_summary(&mut self.machine, OWNED_CONDITIONS);
        self.patch_helper.patch(self.client.as_ref(), &self.machine).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockScopeClient;
    use crate::test_utils::*;
    use crds::conditions::ConditionStatus;
    use serde_json::json;

    const PROVIDER_ID: &str = "azure:///subscriptions/123/resourceGroups/my-rg/providers/Microsoft.Compute/virtualMachineScaleSets/pool1/virtualMachines/0";

    fn pool(drain_timeout: Option<i64>) -> AzureMachinePool {
        serde_json::from_value(json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
            "kind": "AzureMachinePool",
            "metadata": {"name": "pool1", "namespace": NAMESPACE, "uid": "pool1-uid"},
            "spec": {
                "location": "westus2",
                "template": {"vmSize": "Standard_D2s_v3"},
                "nodeDrainTimeoutSeconds": drain_timeout
            }
        }))
        .unwrap()
    }

    fn machine(annotations: serde_json::Value) -> AzureMachinePoolMachine {
        serde_json::from_value(json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
            "kind": "AzureMachinePoolMachine",
            "metadata": {
                "name": "pool1-0",
                "namespace": NAMESPACE,
                "resourceVersion": "11",
                "annotations": annotations
            },
            "spec": {"providerID": PROVIDER_ID, "instanceID": "0"}
        }))
        .unwrap()
    }

    fn node(name: &str, provider_id: &str, ready: bool) -> Node {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {"name": name, "uid": format!("{name}-uid")},
            "spec": {"providerID": provider_id},
            "status": {
                "conditions": [{"type": "Ready", "status": if ready { "True" } else { "False" }}],
                "nodeInfo": {
                    "kubeletVersion": "v1.29.4",
                    "architecture": "amd64",
                    "bootID": "",
                    "containerRuntimeVersion": "containerd://1.7.0",
                    "kernelVersion": "",
                    "kubeProxyVersion": "",
                    "machineID": "",
                    "operatingSystem": "linux",
                    "osImage": "",
                    "systemUUID": ""
                }
            }
        }))
        .unwrap()
    }

    fn pod(name: &str, node: &str, owner_kind: Option<&str>, mirror: bool) -> Pod {
        let owners = owner_kind
            .map(|kind| json!([{"apiVersion": "apps/v1", "kind": kind, "name": "owner", "uid": "owner-uid"}]))
            .unwrap_or(json!([]));
        let annotations = if mirror { json!({MIRROR_POD_ANNOTATION: "hash"}) } else { json!({}) };
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": "apps", "ownerReferences": owners, "annotations": annotations},
            "spec": {"nodeName": node, "containers": []}
        }))
        .unwrap()
    }

    async fn machine_scope(
        client: &MockScopeClient,
        machine: AzureMachinePoolMachine,
        pool: AzureMachinePool,
    ) -> MachinePoolMachineScope {
        let cluster = cluster_scope(client, "my-cluster", azure_cluster("my-cluster", Default::default())).await;
        MachinePoolMachineScope::new(MachinePoolMachineScopeParams {
            client: Arc::new(client.clone()),
            cluster: Arc::new(cluster),
            azure_machine_pool: pool,
            machine,
        })
        .unwrap()
    }

    fn node_healthy(scope: &MachinePoolMachineScope) -> (ConditionStatus, Option<String>) {
        let c = conditions::get(&scope.machine, MACHINE_NODE_HEALTHY).unwrap();
        (c.status, c.reason.clone())
    }

    #[tokio::test]
    async fn test_ready_node_found_by_provider_id() {
        let client = MockScopeClient::new();
        client.workload().add_node(node("other", "azure:///other", true));
        client.workload().add_node(node("vmss-0", &PROVIDER_ID.to_uppercase(), true));
        let mut scope = machine_scope(&client, machine(json!({})), pool(None)).await;

        scope.update_node_status().await.unwrap();

        let status = scope.machine.status.as_ref().unwrap();
        assert!(status.ready);
        assert_eq!(status.version, "v1.29.4");
        let node_ref = status.node_ref.as_ref().unwrap();
        assert_eq!(node_ref.name, "vmss-0");
        assert_eq!(node_ref.kind.as_deref(), Some("Node"));
        assert_eq!(node_healthy(&scope), (ConditionStatus::True, None));
    }

    #[tokio::test]
    async fn test_not_ready_node_fails_node_conditions() {
        let client = MockScopeClient::new();
        client.workload().add_node(node("vmss-0", PROVIDER_ID, false));
        let mut scope = machine_scope(&client, machine(json!({})), pool(None)).await;

        scope.update_node_status().await.unwrap();

        assert!(!scope.machine.status.as_ref().unwrap().ready);
        assert_eq!(
            node_healthy(&scope),
            (ConditionStatus::False, Some(reasons::NODE_CONDITIONS_FAILED.to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_node_is_provisioning_then_not_found() {
        let client = MockScopeClient::new();
        let mut scope = machine_scope(&client, machine(json!({})), pool(None)).await;
        scope.update_node_status().await.unwrap();
        assert_eq!(
            node_healthy(&scope),
            (ConditionStatus::False, Some(reasons::NODE_PROVISIONING.to_string()))
        );

        // A node ref that no longer resolves means the node went away
        scope.machine.status.get_or_insert_with(Default::default).node_ref = Some(ObjectReference::new("Node", "gone"));
        scope.update_node_status().await.unwrap();
        assert_eq!(
            node_healthy(&scope),
            (ConditionStatus::False, Some(reasons::NODE_NOT_FOUND.to_string()))
        );
    }

    #[tokio::test]
    async fn test_set_instance_maps_provisioning_state() {
        let client = MockScopeClient::new();
        let mut scope = machine_scope(&client, machine(json!({})), pool(None)).await;
        let mut instance = ScaleSetInstance {
            id: "vm-0".to_string(),
            instance_id: "0".to_string(),
            name: "pool1000000".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            state: ProvisioningState::Creating,
            latest_model_applied: false,
            zone: Some("1".to_string()),
        };
        scope.set_instance(instance.clone());
        assert!(conditions::is_false(&scope.machine, VM_RUNNING));

        instance.state = ProvisioningState::Succeeded;
        instance.latest_model_applied = true;
        scope.set_instance(instance);

        let status = scope.machine.status.as_ref().unwrap();
        assert_eq!(status.provisioning_state, Some(ProvisioningState::Succeeded));
        assert_eq!(status.instance_name, "pool1000000");
        assert!(status.latest_model_applied);
        assert!(conditions::is_true(&scope.machine, VM_RUNNING));
    }

    #[tokio::test]
    async fn test_drain_cordons_and_evicts_workload_pods() {
        let client = MockScopeClient::new();
        let workload = client.workload();
        workload.add_node(node("vmss-0", PROVIDER_ID, true));
        workload.add_pod(pod("web", "vmss-0", Some("ReplicaSet"), false));
        workload.add_pod(pod("agent", "vmss-0", Some("DaemonSet"), false));
        workload.add_pod(pod("static", "vmss-0", None, true));
        workload.add_pod(pod("elsewhere", "vmss-1", None, false));
        let mut scope = machine_scope(&client, machine(json!({})), pool(Some(60))).await;

        scope.cordon_and_drain().await.unwrap();

        assert_eq!(workload.cordoned(), vec!["vmss-0"]);
        assert_eq!(workload.evicted(), vec!["apps/web"]);
        assert!(conditions::is_true(&scope.machine, DRAINING_SUCCEEDED));
    }

    #[tokio::test]
    async fn test_drain_skipped_when_excluded_or_no_node() {
        let client = MockScopeClient::new();
        client.workload().add_node(node("vmss-0", PROVIDER_ID, true));
        let excluded = machine(json!({EXCLUDE_NODE_DRAINING_ANNOTATION: ""}));
        let mut scope = machine_scope(&client, excluded, pool(None)).await;
        scope.cordon_and_drain().await.unwrap();
        assert!(client.workload().cordoned().is_empty());

        let other = MockScopeClient::new();
        let mut scope = machine_scope(&other, machine(json!({})), pool(None)).await;
        scope.cordon_and_drain().await.unwrap();
        assert!(other.workload().cordoned().is_empty());
        assert!(conditions::get(&scope.machine, DRAINING_SUCCEEDED).is_none());
    }

    #[tokio::test]
    async fn test_close_patches_status_with_resource_version() {
        let client = MockScopeClient::new();
        client.workload().add_node(node("vmss-0", PROVIDER_ID, true));
        let mut scope = machine_scope(&client, machine(json!({})), pool(None)).await;
        scope.update_node_status().await.unwrap();
        scope.close().await.unwrap();

        let patches = client.patches();
        assert_eq!(patches.len(), 1);
        assert!(patches[0].status);
        assert_eq!(patches[0].kind, ObjectKind::AzureMachinePoolMachine);
        assert_eq!(patches[0].patch["metadata"]["resourceVersion"], "11");
        assert_eq!(patches[0].patch["status"]["nodeRef"]["name"], "vmss-0");
    }
}
