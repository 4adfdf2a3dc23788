//! kube-rs implementation of the scope clients

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crds::{
    AzureCluster, AzureClusterIdentity, AzureMachinePool, AzureMachinePoolMachine, AzureManagedControlPlane,
    AzureManagedMachinePool, Cluster, MachinePool,
};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{Node, Pod, Secret};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::ScopeError;
use crate::scope_trait::{NodeClient, ObjectKind, ScopeClient};

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "azure-infra-controller";

/// Key of the kubeconfig inside the `<cluster>-kubeconfig` secret
pub const KUBECONFIG_SECRET_KEY: &str = "value";

/// `<cluster>-kubeconfig`
pub fn kubeconfig_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-kubeconfig")
}

/// Label selector string (`k1=v1,k2=v2`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}

/// Management cluster client
#[derive(Clone)]
pub struct KubeScopeClient {
    client: Client,
}

impl KubeScopeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, ScopeError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn merge_patch<K>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
        status: bool,
    ) -> Result<(), ScopeError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = PatchParams::default();
        let result = if status {
            api.patch_status(name, &params, &Patch::Merge(patch)).await
        } else {
            api.patch(name, &params, &Patch::Merge(patch)).await
        };
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Err(ScopeError::Conflict {
                kind: K::kind(&K::DynamicType::default()).to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_kind(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
        status: bool,
    ) -> Result<(), ScopeError> {
        debug!(kind = %kind, namespace, name, status, "patching object");
        match kind {
            ObjectKind::AzureCluster => self.merge_patch::<AzureCluster>(namespace, name, patch, status).await,
            ObjectKind::AzureManagedControlPlane => {
                self.merge_patch::<AzureManagedControlPlane>(namespace, name, patch, status).await
            }
            ObjectKind::AzureManagedMachinePool => {
                self.merge_patch::<AzureManagedMachinePool>(namespace, name, patch, status).await
            }
            ObjectKind::AzureMachinePool => self.merge_patch::<AzureMachinePool>(namespace, name, patch, status).await,
            ObjectKind::AzureMachinePoolMachine => {
                self.merge_patch::<AzureMachinePoolMachine>(namespace, name, patch, status).await
            }
        }
    }
}

#[async_trait::async_trait]
impl ScopeClient for KubeScopeClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ScopeError> {
        self.get_opt(namespace, name).await
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), ScopeError> {
        let namespace = secret.metadata.namespace.as_deref().unwrap_or("default");
        let name = secret
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ScopeError::InvalidInput("secret has no name".to_string()))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(secret))
            .await?;
        info!("Applied secret {}/{}", namespace, name);
        Ok(())
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ScopeError> {
        self.get_opt(namespace, name).await
    }

    async fn get_cluster_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureClusterIdentity>, ScopeError> {
        self.get_opt(namespace, name).await
    }

    async fn get_azure_cluster(&self, namespace: &str, name: &str) -> Result<Option<AzureCluster>, ScopeError> {
        self.get_opt(namespace, name).await
    }

    async fn get_managed_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureManagedControlPlane>, ScopeError> {
        self.get_opt(namespace, name).await
    }

    async fn get_machine_pool(&self, namespace: &str, name: &str) -> Result<Option<MachinePool>, ScopeError> {
        self.get_opt(namespace, name).await
    }

    async fn get_azure_machine_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureMachinePool>, ScopeError> {
        self.get_opt(namespace, name).await
    }

    async fn list_managed_machine_pools(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AzureManagedMachinePool>, ScopeError> {
        let api: Api<AzureManagedMachinePool> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(&label_selector(labels))).await?;
        Ok(list.items)
    }

    async fn list_machine_pool_machines(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AzureMachinePoolMachine>, ScopeError> {
        let api: Api<AzureMachinePoolMachine> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(&label_selector(labels))).await?;
        Ok(list.items)
    }

    async fn create_machine_pool_machine(
        &self,
        machine: &AzureMachinePoolMachine,
    ) -> Result<AzureMachinePoolMachine, ScopeError> {
        let namespace = machine.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<AzureMachinePoolMachine> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), machine).await?)
    }

    async fn delete_machine_pool_machine(&self, namespace: &str, name: &str) -> Result<(), ScopeError> {
        let api: Api<AzureMachinePoolMachine> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => {
                debug!(namespace, name, "machine pool machine already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_object(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ScopeError> {
        self.patch_kind(kind, namespace, name, patch, false).await
    }

    async fn patch_object_status(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ScopeError> {
        self.patch_kind(kind, namespace, name, patch, true).await
    }

    async fn workload_cluster_client(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Arc<dyn NodeClient>, ScopeError> {
        let secret_name = kubeconfig_secret_name(cluster_name);
        let secret = self
            .get_secret(namespace, &secret_name)
            .await?
            .ok_or_else(|| ScopeError::InvalidInput(format!("kubeconfig secret {namespace}/{secret_name} not found")))?;
        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_SECRET_KEY))
            .ok_or_else(|| {
                ScopeError::InvalidInput(format!(
                    "kubeconfig secret {namespace}/{secret_name} has no key {KUBECONFIG_SECRET_KEY}"
                ))
            })?;
        let raw = std::str::from_utf8(&data.0)
            .map_err(|e| ScopeError::InvalidInput(format!("kubeconfig is not UTF-8: {e}")))?;

        let kubeconfig =
            Kubeconfig::from_yaml(raw).map_err(|e| ScopeError::InvalidInput(format!("invalid kubeconfig: {e}")))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ScopeError::InvalidInput(format!("failed to load kubeconfig: {e}")))?;
        let client = Client::try_from(config)?;
        Ok(Arc::new(KubeNodeClient::new(client)))
    }
}

/// Workload cluster client
#[derive(Clone)]
pub struct KubeNodeClient {
    client: Client,
}

impl KubeNodeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl NodeClient for KubeNodeClient {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, ScopeError> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ScopeError> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn cordon_node(&self, name: &str) -> Result<(), ScopeError> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.cordon(name).await?;
        info!("Cordoned node {}", name);
        Ok(())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, ScopeError> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        Ok(api.list(&params).await?.items)
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ScopeError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.evict(name, &EvictParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector() {
        let labels = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "a=1,b=2");
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }

    #[test]
    fn test_kubeconfig_secret_name() {
        assert_eq!(kubeconfig_secret_name("my-cluster"), "my-cluster-kubeconfig");
    }
}
