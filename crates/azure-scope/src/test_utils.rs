//! Builders shared by the scope tests

use std::sync::Arc;

use azure_credentials::{AzureClients, EnvSettings};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crds::cluster_api::CLUSTER_NAME_LABEL;
use crds::{
    AzureCluster, AzureClusterSpec, AzureManagedControlPlane, AzureManagedControlPlaneSpec, AzureManagedMachinePool,
    Cluster, ClusterSpec, MachinePool,
};
use serde_json::json;

use crate::mock::MockScopeClient;
use crate::scope::{ClusterScope, ClusterScopeParams, ManagedControlPlaneScope, ManagedControlPlaneScopeParams};

pub const NAMESPACE: &str = "default";
pub const SUBSCRIPTION_ID: &str = "123";
pub const SSH_KEY: &str = "ssh-rsa AAAAB3NzaC1yc2E fake@host";

/// Credential context backed by a static client secret
pub fn azure_clients() -> AzureClients {
    AzureClients::new(EnvSettings {
        tenant_id: "tenant".to_string(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        subscription_id: SUBSCRIPTION_ID.to_string(),
        ..Default::default()
    })
}

pub fn cluster(name: &str) -> Cluster {
    let mut cluster = Cluster::new(name, ClusterSpec::default());
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster
}

pub fn azure_cluster(name: &str, spec: AzureClusterSpec) -> AzureCluster {
    let mut azure_cluster = AzureCluster::new(name, spec);
    azure_cluster.metadata.namespace = Some(NAMESPACE.to_string());
    azure_cluster.metadata.resource_version = Some("1".to_string());
    azure_cluster
}

pub async fn cluster_scope(client: &MockScopeClient, cluster_name: &str, azure_cluster: AzureCluster) -> ClusterScope {
    ClusterScope::new(ClusterScopeParams {
        client: Arc::new(client.clone()),
        azure_clients: azure_clients(),
        cluster: cluster(cluster_name),
        azure_cluster,
    })
    .await
    .unwrap()
}

/// Managed control plane in VNet my-vnet/my-subnet, resource group my-rg
pub fn managed_control_plane(name: &str) -> AzureManagedControlPlane {
    let mut cp = AzureManagedControlPlane::new(
        name,
        AzureManagedControlPlaneSpec {
            version: "v1.29.4".to_string(),
            resource_group_name: "my-rg".to_string(),
            node_resource_group_name: "my-node-rg".to_string(),
            subscription_id: SUBSCRIPTION_ID.to_string(),
            location: "westus2".to_string(),
            ssh_public_key: STANDARD.encode(SSH_KEY),
            virtual_network: serde_json::from_value(json!({
                "name": "my-vnet",
                "cidrBlock": "10.0.0.0/8",
                "subnet": {"name": "my-subnet", "cidrBlock": "10.240.0.0/16"}
            }))
            .unwrap(),
            ..Default::default()
        },
    );
    cp.metadata.namespace = Some(NAMESPACE.to_string());
    cp.metadata.uid = Some(format!("{name}-uid"));
    cp
}

pub async fn managed_control_plane_scope(client: &MockScopeClient, cluster_name: &str) -> ManagedControlPlaneScope {
    ManagedControlPlaneScope::new(ManagedControlPlaneScopeParams {
        client: Arc::new(client.clone()),
        azure_clients: azure_clients(),
        cluster: cluster(cluster_name),
        control_plane: managed_control_plane(cluster_name),
    })
    .await
    .unwrap()
}

/// Agent pool of my-cluster, optionally owned by MachinePool `owner`
pub fn managed_pool(name: &str, mode: &str, owner: Option<&str>) -> AzureManagedMachinePool {
    let owners = owner
        .map(|o| {
            json!([{
                "apiVersion": "cluster.x-k8s.io/v1beta1",
                "kind": "MachinePool",
                "name": o,
                "uid": format!("{o}-uid")
            }])
        })
        .unwrap_or(json!([]));
    serde_json::from_value(json!({
        "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
        "kind": "AzureManagedMachinePool",
        "metadata": {
            "name": name,
            "namespace": NAMESPACE,
            "labels": {CLUSTER_NAME_LABEL: "my-cluster"},
            "ownerReferences": owners
        },
        "spec": {"mode": mode, "sku": "Standard_D2s_v3"}
    }))
    .unwrap()
}

pub fn machine_pool(name: &str, version: &str, replicas: Option<i32>) -> MachinePool {
    serde_json::from_value(json!({
        "apiVersion": "cluster.x-k8s.io/v1beta1",
        "kind": "MachinePool",
        "metadata": {"name": name, "namespace": NAMESPACE, "uid": format!("{name}-uid")},
        "spec": {
            "clusterName": "my-cluster",
            "replicas": replicas,
            "template": {"spec": {"clusterName": "my-cluster", "version": version}}
        }
    }))
    .unwrap()
}
