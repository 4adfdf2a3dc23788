//! Fixtures shared by the reconciler tests

use std::sync::{Arc, Mutex};

use azure_credentials::EnvSettings;
use azure_scope::ResourceSpec;
use azure_scope::ResourceSpecGetter;
use azure_scope::ScaleSetState;
use azure_scope::async_ops::{OperationStatus, ResourceOperator};
use azure_scope::error::OperationError;
use crds::{AzureManagedControlPlane, Cluster, ClusterSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::json;

pub const NAMESPACE: &str = "default";

/// Operator calls in the order they happened, across operators
#[derive(Debug, Clone, Default)]
pub struct SharedLog(Arc<Mutex<Vec<String>>>);

impl SharedLog {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }
}

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Done,
    InProgress,
    Fail,
}

/// Executor that records every call and answers the same way each time
#[derive(Debug)]
pub struct RecordingOperator {
    service: String,
    behaviour: Behaviour,
    log: Mutex<SharedLog>,
    observed: Mutex<Option<ScaleSetState>>,
}

impl RecordingOperator {
    fn new(service: &str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            service: service.to_string(),
            behaviour,
            log: Mutex::new(SharedLog::default()),
            observed: Mutex::new(None),
        })
    }

    pub fn done(service: &str) -> Arc<Self> {
        Self::new(service, Behaviour::Done)
    }

    pub fn in_progress(service: &str) -> Arc<Self> {
        Self::new(service, Behaviour::InProgress)
    }

    pub fn failing(service: &str) -> Arc<Self> {
        Self::new(service, Behaviour::Fail)
    }

    /// Record into `log` instead of a private one
    pub fn share_log(&self, log: &SharedLog) {
        *self.log.lock().unwrap() = log.clone();
    }

    /// Report `state` as the scale set behind every spec
    pub fn observe(&self, state: ScaleSetState) {
        *self.observed.lock().unwrap() = Some(state);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().entries()
    }

    fn answer(&self, verb: &str, spec: &ResourceSpec) -> Result<OperationStatus, OperationError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{verb} {}", spec.resource_name()));
        match self.behaviour {
            Behaviour::Done => Ok(OperationStatus::Done),
            Behaviour::InProgress => Ok(OperationStatus::InProgress(format!("{verb}-token"))),
            Behaviour::Fail => Err(OperationError::Failed {
                service: self.service.clone(),
                name: spec.resource_name().to_string(),
                message: "quota exceeded".to_string(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl ResourceOperator for RecordingOperator {
    fn service_name(&self) -> &str {
        &self.service
    }

    async fn create_or_update_async(
        &self,
        spec: &ResourceSpec,
        _resume_token: Option<&str>,
    ) -> Result<OperationStatus, OperationError> {
        self.answer("create", spec)
    }

    async fn delete_async(
        &self,
        spec: &ResourceSpec,
        _resume_token: Option<&str>,
    ) -> Result<OperationStatus, OperationError> {
        self.answer("delete", spec)
    }

    async fn observed_scale_set(&self, _spec: &ResourceSpec) -> Result<Option<ScaleSetState>, OperationError> {
        Ok(self.observed.lock().unwrap().clone())
    }
}

/// Settings with a static client secret
pub fn settings() -> EnvSettings {
    EnvSettings {
        tenant_id: "tenant".to_string(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        subscription_id: "123".to_string(),
        ..Default::default()
    }
}

pub fn cluster(name: &str) -> Cluster {
    let mut cluster = Cluster::new(name, ClusterSpec::default());
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster
}

/// Owner reference as Cluster API sets it on infrastructure objects
pub fn owner(kind: &str, api_version: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{name}-uid"),
        controller: Some(true),
        ..Default::default()
    }
}

pub fn cluster_owner(name: &str) -> OwnerReference {
    owner("Cluster", "cluster.x-k8s.io/v1beta1", name)
}

/// Managed control plane owned by Cluster `my-cluster`
pub fn control_plane() -> AzureManagedControlPlane {
    serde_json::from_value(json!({
        "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
        "kind": "AzureManagedControlPlane",
        "metadata": {
            "name": "my-cluster",
            "namespace": NAMESPACE,
            "uid": "my-cluster-uid",
            "ownerReferences": [cluster_owner("my-cluster")]
        },
        "spec": {
            "version": "v1.29.4",
            "resourceGroupName": "my-rg",
            "nodeResourceGroupName": "my-node-rg",
            "subscriptionID": "123",
            "location": "westus2",
            "sshPublicKey": "",
            "virtualNetwork": {
                "name": "my-vnet",
                "cidrBlock": "10.0.0.0/8",
                "subnet": {"name": "my-subnet", "cidrBlock": "10.240.0.0/16"}
            }
        }
    }))
    .unwrap()
}
