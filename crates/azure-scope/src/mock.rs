//! In-memory scope clients for unit tests
//!
//! Objects are stored per `(namespace, name)`. Patches are recorded so tests
//! can assert on what a scope sent, and merge patches against stored
//! machine pool machines and machine pools are applied to the stored copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crds::{
    AzureCluster, AzureClusterIdentity, AzureMachinePool, AzureMachinePoolMachine, AzureManagedControlPlane,
    AzureManagedMachinePool, Cluster, MachinePool,
};
use k8s_openapi::api::core::v1::{Node, Pod, Secret};
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ScopeError;
use crate::patch::apply_merge_patch;
use crate::scope_trait::{NodeClient, ObjectKind, ScopeClient};

type Key = (String, String);

fn key_of<K: Resource>(obj: &K) -> Key {
    let meta = obj.meta();
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn labels_match<K: Resource>(obj: &K, namespace: &str, selector: &BTreeMap<String, String>) -> bool {
    let meta = obj.meta();
    if meta.namespace.as_deref().unwrap_or_default() != namespace {
        return false;
    }
    let labels = meta.labels.clone().unwrap_or_default();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

fn apply_patch<K: Serialize + DeserializeOwned>(obj: &mut K, patch: &serde_json::Value) -> Result<(), ScopeError> {
    let mut value = serde_json::to_value(&*obj)?;
    let mut patch = patch.clone();
    if let Some(metadata) = patch.get_mut("metadata").and_then(serde_json::Value::as_object_mut) {
        metadata.remove("resourceVersion");
    }
    apply_merge_patch(&mut value, &patch);
    *obj = serde_json::from_value(value)?;
    Ok(())
}

/// Patch sent through the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPatch {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
    pub patch: serde_json::Value,
    /// Sent to the status subresource
    pub status: bool,
}

/// Mock management cluster client
#[derive(Clone, Default)]
pub struct MockScopeClient {
    secrets: Arc<Mutex<HashMap<Key, Secret>>>,
    clusters: Arc<Mutex<HashMap<Key, Cluster>>>,
    identities: Arc<Mutex<HashMap<Key, AzureClusterIdentity>>>,
    azure_clusters: Arc<Mutex<HashMap<Key, AzureCluster>>>,
    control_planes: Arc<Mutex<HashMap<Key, AzureManagedControlPlane>>>,
    machine_pools: Arc<Mutex<HashMap<Key, MachinePool>>>,
    azure_machine_pools: Arc<Mutex<HashMap<Key, AzureMachinePool>>>,
    managed_machine_pools: Arc<Mutex<HashMap<Key, AzureManagedMachinePool>>>,
    machine_pool_machines: Arc<Mutex<HashMap<Key, AzureMachinePoolMachine>>>,
    patches: Arc<Mutex<Vec<RecordedPatch>>>,
    deleted: Arc<Mutex<Vec<Key>>>,
    conflict_on_patch: Arc<Mutex<bool>>,
    workload: MockNodeClient,
}

impl MockScopeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_secret(&self, secret: Secret) {
        self.secrets.lock().unwrap().insert(key_of(&secret), secret);
    }

    pub fn add_cluster(&self, cluster: Cluster) {
        self.clusters.lock().unwrap().insert(key_of(&cluster), cluster);
    }

    pub fn add_cluster_identity(&self, identity: AzureClusterIdentity) {
        self.identities.lock().unwrap().insert(key_of(&identity), identity);
    }

    pub fn add_azure_cluster(&self, cluster: AzureCluster) {
        self.azure_clusters.lock().unwrap().insert(key_of(&cluster), cluster);
    }

    pub fn add_managed_control_plane(&self, control_plane: AzureManagedControlPlane) {
        self.control_planes
            .lock()
            .unwrap()
            .insert(key_of(&control_plane), control_plane);
    }

    pub fn add_machine_pool(&self, pool: MachinePool) {
        self.machine_pools.lock().unwrap().insert(key_of(&pool), pool);
    }

    pub fn add_azure_machine_pool(&self, pool: AzureMachinePool) {
        self.azure_machine_pools.lock().unwrap().insert(key_of(&pool), pool);
    }

    pub fn add_managed_machine_pool(&self, pool: AzureManagedMachinePool) {
        self.managed_machine_pools.lock().unwrap().insert(key_of(&pool), pool);
    }

    pub fn add_machine_pool_machine(&self, machine: AzureMachinePoolMachine) {
        self.machine_pool_machines
            .lock()
            .unwrap()
            .insert(key_of(&machine), machine);
    }

    /// Stored machine pool machines, sorted by name
    pub fn machine_pool_machines(&self) -> Vec<AzureMachinePoolMachine> {
        let mut machines: Vec<_> = self.machine_pool_machines.lock().unwrap().values().cloned().collect();
        machines.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        machines
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Every patch sent so far
    pub fn patches(&self) -> Vec<RecordedPatch> {
        self.patches.lock().unwrap().clone()
    }

    /// Names of deleted machine pool machines, in deletion order
    pub fn deleted_machines(&self) -> Vec<String> {
        self.deleted.lock().unwrap().iter().map(|(_, n)| n.clone()).collect()
    }

    /// Make every following patch fail with a conflict
    pub fn set_conflict_on_patch(&self, conflict: bool) {
        *self.conflict_on_patch.lock().unwrap() = conflict;
    }

    /// Workload cluster returned by `workload_cluster_client`
    pub fn workload(&self) -> &MockNodeClient {
        &self.workload
    }

    fn record_patch(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
        status: bool,
    ) -> Result<(), ScopeError> {
        if *self.conflict_on_patch.lock().unwrap() {
            return Err(ScopeError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            });
        }
        self.patches.lock().unwrap().push(RecordedPatch {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            patch: patch.clone(),
            status,
        });

        let key = (namespace.to_string(), name.to_string());
        match kind {
            ObjectKind::AzureMachinePoolMachine => {
                if let Some(machine) = self.machine_pool_machines.lock().unwrap().get_mut(&key) {
                    apply_patch(machine, patch)?;
                }
            }
            ObjectKind::AzureMachinePool => {
                if let Some(pool) = self.azure_machine_pools.lock().unwrap().get_mut(&key) {
                    apply_patch(pool, patch)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScopeClient for MockScopeClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ScopeError> {
        Ok(self.secret(namespace, name))
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), ScopeError> {
        self.add_secret(secret.clone());
        Ok(())
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ScopeError> {
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_cluster_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureClusterIdentity>, ScopeError> {
        Ok(self
            .identities
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_azure_cluster(&self, namespace: &str, name: &str) -> Result<Option<AzureCluster>, ScopeError> {
        Ok(self
            .azure_clusters
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_managed_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureManagedControlPlane>, ScopeError> {
        Ok(self
            .control_planes
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_machine_pool(&self, namespace: &str, name: &str) -> Result<Option<MachinePool>, ScopeError> {
        Ok(self
            .machine_pools
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_azure_machine_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureMachinePool>, ScopeError> {
        Ok(self
            .azure_machine_pools
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_managed_machine_pools(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AzureManagedMachinePool>, ScopeError> {
        let mut pools: Vec<_> = self
            .managed_machine_pools
            .lock()
            .unwrap()
            .values()
            .filter(|p| labels_match(*p, namespace, labels))
            .cloned()
            .collect();
        pools.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(pools)
    }

    async fn list_machine_pool_machines(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AzureMachinePoolMachine>, ScopeError> {
        Ok(self
            .machine_pool_machines()
            .into_iter()
            .filter(|m| labels_match(m, namespace, labels))
            .collect())
    }

    async fn create_machine_pool_machine(
        &self,
        machine: &AzureMachinePoolMachine,
    ) -> Result<AzureMachinePoolMachine, ScopeError> {
        let key = key_of(machine);
        let mut store = self.machine_pool_machines.lock().unwrap();
        if store.contains_key(&key) {
            return Err(ScopeError::Conflict {
                kind: ObjectKind::AzureMachinePoolMachine.to_string(),
                name: key.1,
            });
        }
        store.insert(key, machine.clone());
        Ok(machine.clone())
    }

    async fn delete_machine_pool_machine(&self, namespace: &str, name: &str) -> Result<(), ScopeError> {
        let key = (namespace.to_string(), name.to_string());
        self.machine_pool_machines.lock().unwrap().remove(&key);
        self.deleted.lock().unwrap().push(key);
        Ok(())
    }

    async fn patch_object(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ScopeError> {
        self.record_patch(kind, namespace, name, patch, false)
    }

    async fn patch_object_status(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ScopeError> {
        self.record_patch(kind, namespace, name, patch, true)
    }

    async fn workload_cluster_client(
        &self,
        _namespace: &str,
        _cluster_name: &str,
    ) -> Result<Arc<dyn NodeClient>, ScopeError> {
        Ok(Arc::new(self.workload.clone()))
    }
}

/// Mock workload cluster
#[derive(Clone, Default)]
pub struct MockNodeClient {
    nodes: Arc<Mutex<HashMap<String, Node>>>,
    pods: Arc<Mutex<Vec<Pod>>>,
    cordoned: Arc<Mutex<Vec<String>>>,
    evicted: Arc<Mutex<Vec<Key>>>,
}

impl MockNodeClient {
    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.lock().unwrap().insert(name, node);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn cordoned(&self) -> Vec<String> {
        self.cordoned.lock().unwrap().clone()
    }

    /// `namespace/name` of every evicted pod
    pub fn evicted(&self) -> Vec<String> {
        self.evicted
            .lock()
            .unwrap()
            .iter()
            .map(|(ns, name)| format!("{ns}/{name}"))
            .collect()
    }
}

#[async_trait::async_trait]
impl NodeClient for MockNodeClient {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, ScopeError> {
        Ok(self.nodes.lock().unwrap().get(name).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ScopeError> {
        let mut nodes: Vec<_> = self.nodes.lock().unwrap().values().cloned().collect();
        nodes.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(nodes)
    }

    async fn cordon_node(&self, name: &str) -> Result<(), ScopeError> {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(name) {
            node.spec.get_or_insert_with(Default::default).unschedulable = Some(true);
        }
        self.cordoned.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, ScopeError> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node_name))
            .cloned()
            .collect())
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ScopeError> {
        self.pods.lock().unwrap().retain(|p| {
            !(p.metadata.namespace.as_deref() == Some(namespace) && p.metadata.name.as_deref() == Some(name))
        });
        self.evicted
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string()));
        Ok(())
    }
}
