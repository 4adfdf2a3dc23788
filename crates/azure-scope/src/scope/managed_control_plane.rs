//! Scope for an AKS managed control plane
//!
//! Azure runs the control plane; the scope only projects the managed
//! cluster, its VNet and its agent pools, and hands the admin kubeconfig
//! back to Cluster API through a secret.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use azure_credentials::AzureClients;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crds::azure_managed_machine_pool::NodePoolMode;
use crds::cluster_api::{ApiEndpoint, CLUSTER_NAME_LABEL};
use crds::conditions::{
    AGENT_POOLS_READY, MANAGED_CLUSTER_RUNNING, READY, RESOURCE_GROUP_READY, SUBNETS_READY, VNET_READY,
};
use crds::futures::{Future, FutureType};
use crds::tags::{self as ownership, Tags};
use crds::{AzureManagedControlPlane, Cluster};
use ipnetwork::IpNetwork;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::Resource;
use kube::api::ObjectMeta;
use semver::Version;
use tracing::{debug, info, warn};

use crate::client::{KUBECONFIG_SECRET_KEY, kubeconfig_secret_name};
use crate::conditions::{set_summary, update_delete_status, update_put_status};
use crate::error::{OperationError, ScopeError};
use crate::lro;
use crate::names;
use crate::patch::PatchHelper;
use crate::scope::managed_machine_pool::agent_pool_spec;
use crate::scope::{ClusterScoper, ServiceSpecs};
use crate::scope_trait::{ObjectKind, ScopeClient};
use crate::specs::{AgentPoolSpec, GroupSpec, ManagedClusterSpec, ResourceSpec, SubnetSpec, VnetSpec};

/// Conditions summarised into `Ready` on close
const OWNED_CONDITIONS: &[&str] = &[
    READY,
    RESOURCE_GROUP_READY,
    VNET_READY,
    SUBNETS_READY,
    MANAGED_CLUSTER_RUNNING,
    AGENT_POOLS_READY,
];

/// Secret type Cluster API expects on kubeconfig secrets
const CLUSTER_SECRET_TYPE: &str = "cluster.x-k8s.io/secret";

/// Inputs of [`ManagedControlPlaneScope::new`]
pub struct ManagedControlPlaneScopeParams {
    pub client: Arc<dyn ScopeClient>,
    pub azure_clients: AzureClients,
    pub cluster: Cluster,
    pub control_plane: AzureManagedControlPlane,
}

/// Per-pass scope over an AzureManagedControlPlane
pub struct ManagedControlPlaneScope {
    client: Arc<dyn ScopeClient>,
    azure_clients: AzureClients,
    patch_helper: PatchHelper,
    cluster_name: String,
    kubeconfig: Option<Vec<u8>>,
    pub cluster: Cluster,
    pub control_plane: AzureManagedControlPlane,
}

fn parse_version(version: &str) -> Result<Version, ScopeError> {
    Version::parse(version.trim_start_matches('v'))
        .map_err(|e| ScopeError::InvalidInput(format!("invalid Kubernetes version {version:?}: {e}")))
}

/// At most one CIDR per range is supported
fn single_cidr(blocks: Option<&Vec<String>>, what: &str) -> Result<Option<String>, ScopeError> {
    match blocks.map(Vec::as_slice).unwrap_or_default() {
        [] => Ok(None),
        [cidr] => Ok(Some(cidr.clone())),
        many => Err(ScopeError::InvalidInput(format!(
            "{what} CIDR blocks: expected at most one, got {}",
            many.len()
        ))),
    }
}

impl ManagedControlPlaneScope {
    /// Resolve credentials and snapshot the control plane
    pub async fn new(params: ManagedControlPlaneScopeParams) -> Result<Self, ScopeError> {
        let ManagedControlPlaneScopeParams {
            client,
            mut azure_clients,
            cluster,
            control_plane,
        } = params;

        let cluster_name = cluster
            .metadata
            .name
            .clone()
            .ok_or_else(|| ScopeError::InvalidInput("Cluster has no name".to_string()))?;
        let namespace = control_plane.metadata.namespace.clone().unwrap_or_default();

        match &control_plane.spec.identity_ref {
            Some(identity_ref) => {
                let provider =
                    crate::identity::IdentityCredentialsProvider::load(client.as_ref(), identity_ref, &namespace)
                        .await?;
                azure_clients
                    .set_credentials_with_provider(
                        &control_plane.spec.subscription_id,
                        &control_plane.spec.azure_environment,
                        &provider,
                    )
                    .await?;
            }
            None => azure_clients.set_credentials(
                &control_plane.spec.subscription_id,
                &control_plane.spec.azure_environment,
            )?,
        }

        let patch_helper = PatchHelper::new(ObjectKind::AzureManagedControlPlane, &control_plane)?;
        debug!(cluster = %cluster_name, namespace = %namespace, "built managed control plane scope");

        Ok(Self {
            client,
            azure_clients,
            patch_helper,
            cluster_name,
            kubeconfig: None,
            cluster,
            control_plane,
        })
    }

    fn cluster_network(&self) -> Option<&crds::ClusterNetwork> {
        self.cluster.spec.cluster_network.as_ref()
    }

    fn tags(&self) -> Tags {
        ownership::build(&self.cluster_name, "", "", &self.control_plane.spec.additional_tags)
    }

    /// Managed cluster projection.
    ///
    /// Fails on an SSH key that is not valid base64, on more than one
    /// service or pod CIDR, and on a DNS service IP outside the service CIDR.
    pub fn managed_cluster_spec(&self) -> Result<ManagedClusterSpec, ScopeError> {
        let spec = &self.control_plane.spec;

        let decoded = STANDARD
            .decode(spec.ssh_public_key.trim())
            .map_err(|e| ScopeError::InvalidInput(format!("failed to decode SSH public key: {e}")))?;
        let ssh_public_key = String::from_utf8(decoded)
            .map_err(|e| ScopeError::InvalidInput(format!("SSH public key is not UTF-8: {e}")))?;

        let network = self.cluster_network();
        let service_cidr = single_cidr(network.and_then(|n| n.services.as_ref()).map(|r| &r.cidr_blocks), "service")?;
        let pod_cidr = single_cidr(network.and_then(|n| n.pods.as_ref()).map(|r| &r.cidr_blocks), "pod")?;

        let service_network = service_cidr
            .as_deref()
            .map(|cidr| {
                cidr.parse::<IpNetwork>()
                    .map_err(|e| ScopeError::InvalidInput(format!("invalid service CIDR {cidr:?}: {e}")))
            })
            .transpose()?;

        if let Some(dns_service_ip) = &spec.dns_service_ip {
            let ip: IpAddr = dns_service_ip
                .parse()
                .map_err(|e| ScopeError::InvalidInput(format!("invalid DNS service IP {dns_service_ip:?}: {e}")))?;
            if !service_network.is_some_and(|net| net.contains(ip)) {
                return Err(ScopeError::DnsServiceIpOutsideServiceCidr {
                    dns_service_ip: dns_service_ip.clone(),
                    service_cidr: service_cidr.clone(),
                });
            }
        }

        let ip_families = service_network
            .map(|net| vec![if net.is_ipv4() { "IPv4" } else { "IPv6" }.to_string()])
            .unwrap_or_default();

        Ok(ManagedClusterSpec {
            name: self.cluster_name.clone(),
            resource_group: self.resource_group().to_string(),
            node_resource_group: self.node_resource_group().to_string(),
            cluster_name: self.cluster_name.clone(),
            location: self.location().to_string(),
            tags: self.tags(),
            version: spec.version.trim_start_matches('v').to_string(),
            vnet_subnet_id: names::subnet_id(
                self.subscription_id(),
                self.vnet_resource_group(),
                self.vnet_name(),
                self.node_subnet_name(),
            ),
            ssh_public_key,
            network_plugin: spec.network_plugin.clone(),
            network_policy: spec.network_policy.clone(),
            outbound_type: spec.outbound_type.clone(),
            load_balancer_sku: spec.load_balancer_sku.clone(),
            service_cidr,
            pod_cidr,
            dns_service_ip: spec.dns_service_ip.clone(),
            ip_families,
            aad_profile: spec.aad_profile.clone(),
            sku_tier: spec.sku.as_ref().map(|s| s.tier.clone()),
            load_balancer_profile: spec.load_balancer_profile.clone(),
            api_server_access_profile: spec.api_server_access_profile.clone(),
            addon_profiles: spec.addon_profiles.clone(),
        })
    }

    /// Agent pools of every managed machine pool labelled with this cluster.
    ///
    /// Pools whose MachinePool is missing are skipped. At least one System
    /// pool must remain, and no pool may run a newer Kubernetes version
    /// than the control plane.
    pub async fn get_all_agent_pool_specs(&self) -> Result<Vec<AgentPoolSpec>, ScopeError> {
        let labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), self.cluster_name.clone())]);
        let pools = self.client.list_managed_machine_pools(self.namespace(), &labels).await?;
        let control_plane_version = parse_version(&self.control_plane.spec.version)?;

        let mut specs = Vec::with_capacity(pools.len());
        let mut has_system_pool = false;
        for pool in &pools {
            let pool_name = pool.metadata.name.as_deref().unwrap_or_default();
            let owner = pool
                .metadata
                .owner_references
                .iter()
                .flatten()
                .find(|r| r.kind == "MachinePool");
            let Some(owner) = owner else {
                info!(pool = %pool_name, "managed machine pool has no MachinePool owner yet, skipping");
                continue;
            };
            let Some(machine_pool) = self.client.get_machine_pool(self.namespace(), &owner.name).await? else {
                info!(pool = %pool_name, machine_pool = %owner.name, "MachinePool not found, skipping");
                continue;
            };

            if let Some(version) = machine_pool.spec.template.spec.version.as_deref()
                && parse_version(version)? > control_plane_version
            {
                return Err(ScopeError::PoolVersionExceedsControlPlane {
                    pool: pool_name.to_string(),
                    pool_version: version.to_string(),
                    control_plane_version: self.control_plane.spec.version.clone(),
                });
            }

            has_system_pool |= pool.spec.mode == NodePoolMode::System;
            specs.push(agent_pool_spec(self, pool, &machine_pool));
        }

        if !has_system_pool {
            return Err(ScopeError::NoSystemPool);
        }
        Ok(specs)
    }

    pub fn group_spec(&self) -> GroupSpec {
        GroupSpec {
            name: self.resource_group().to_string(),
            location: self.location().to_string(),
            cluster_name: self.cluster_name.clone(),
            additional_tags: self.additional_tags(),
        }
    }

    pub fn vnet_spec(&self) -> VnetSpec {
        let vnet = &self.control_plane.spec.virtual_network;
        VnetSpec {
            name: vnet.name.clone(),
            resource_group: self.vnet_resource_group().to_string(),
            cidrs: vec![vnet.cidr_block.clone()],
            location: self.location().to_string(),
            extended_location: None,
            cluster_name: self.cluster_name.clone(),
            additional_tags: self.additional_tags(),
        }
    }

    /// Default agent pool subnet
    pub fn subnet_spec(&self) -> SubnetSpec {
        let subnet = &self.control_plane.spec.virtual_network.subnet;
        SubnetSpec {
            name: subnet.name.clone(),
            resource_group: self.vnet_resource_group().to_string(),
            subscription_id: self.subscription_id().to_string(),
            cidrs: vec![subnet.cidr_block.clone()],
            vnet_name: self.vnet_name().to_string(),
            vnet_resource_group: self.vnet_resource_group().to_string(),
            is_vnet_managed: true,
            role: crds::network::SubnetRole::Node,
            ..Default::default()
        }
    }

    /// Resource families in creation order: group, VNet, subnet, managed cluster, agent pools
    pub async fn resource_specs(&self) -> Result<Vec<ServiceSpecs>, ScopeError> {
        let managed_cluster = self.managed_cluster_spec()?;
        let agent_pools = self.get_all_agent_pool_specs().await?;
        Ok(vec![
            ServiceSpecs {
                condition: RESOURCE_GROUP_READY,
                specs: vec![self.group_spec().into()],
            },
            ServiceSpecs {
                condition: VNET_READY,
                specs: vec![self.vnet_spec().into()],
            },
            ServiceSpecs {
                condition: SUBNETS_READY,
                specs: vec![self.subnet_spec().into()],
            },
            ServiceSpecs {
                condition: MANAGED_CLUSTER_RUNNING,
                specs: vec![managed_cluster.into()],
            },
            ServiceSpecs {
                condition: AGENT_POOLS_READY,
                specs: agent_pools.into_iter().map(ResourceSpec::from).collect(),
            },
        ])
    }

    /// Keep the admin kubeconfig for [`Self::apply_kubeconfig`]
    pub fn set_kubeconfig_data(&mut self, data: Vec<u8>) {
        self.kubeconfig = Some(data);
    }

    pub fn kubeconfig_data(&self) -> Option<&[u8]> {
        self.kubeconfig.as_deref()
    }

    /// `<cluster>-kubeconfig` secret owned by the control plane
    pub fn kubeconfig_secret(&self) -> Result<Secret, ScopeError> {
        let owner = self
            .control_plane
            .controller_owner_ref(&())
            .ok_or_else(|| ScopeError::InvalidInput("AzureManagedControlPlane has no uid".to_string()))?;
        let data = self.kubeconfig.clone().unwrap_or_default();

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(kubeconfig_secret_name(&self.cluster_name)),
                namespace: Some(self.namespace().to_string()),
                labels: Some(BTreeMap::from([(
                    CLUSTER_NAME_LABEL.to_string(),
                    self.cluster_name.clone(),
                )])),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(KUBECONFIG_SECRET_KEY.to_string(), ByteString(data))])),
            type_: Some(CLUSTER_SECRET_TYPE.to_string()),
            ..Default::default()
        })
    }

    /// Write the kubeconfig secret when a kubeconfig was fetched this pass
    pub async fn apply_kubeconfig(&self) -> Result<(), ScopeError> {
        if self.kubeconfig.is_none() {
            warn!(cluster = %self.cluster_name, "no kubeconfig fetched, leaving secret untouched");
            return Ok(());
        }
        let secret = self.kubeconfig_secret()?;
        self.client.apply_secret(&secret).await?;
        info!(cluster = %self.cluster_name, "applied kubeconfig secret");
        Ok(())
    }

    pub fn set_control_plane_endpoint(&mut self, endpoint: ApiEndpoint) {
        self.control_plane.spec.control_plane_endpoint = endpoint;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.control_plane.status.get_or_insert_with(Default::default).ready = ready;
    }

    pub fn set_initialized(&mut self, initialized: bool) {
        self.control_plane.status.get_or_insert_with(Default::default).initialized = initialized;
    }

    pub fn set_long_running_operation_state(&mut self, future: Future) {
        lro::set(&mut self.control_plane, future);
    }

    pub fn get_long_running_operation_state(&self, name: &str, service: &str, type_: FutureType) -> Option<Future> {
        lro::get(&self.control_plane, name, service, type_).cloned()
    }

    pub fn delete_long_running_operation_state(&mut self, name: &str, service: &str, type_: FutureType) {
        lro::delete(&mut self.control_plane, name, service, type_);
    }

    pub fn update_put_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_put_status(&mut self.control_plane, condition, service, err);
    }

    pub fn update_delete_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_delete_status(&mut self.control_plane, condition, service, err);
    }

    /// Summarise conditions and patch the AzureManagedControlPlane
    pub async fn close(mut self) -> Result<(), ScopeError> {
        set_summary(&mut self.control_plane, OWNED_CONDITIONS);
        self.patch_helper.patch(self.client.as_ref(), &self.control_plane).await
    }
}

impl ClusterScoper for ManagedControlPlaneScope {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn namespace(&self) -> &str {
        self.control_plane.metadata.namespace.as_deref().unwrap_or_default()
    }

    fn subscription_id(&self) -> &str {
        self.azure_clients.subscription_id()
    }

    fn resource_group(&self) -> &str {
        &self.control_plane.spec.resource_group_name
    }

    fn node_resource_group(&self) -> &str {
        &self.control_plane.spec.node_resource_group_name
    }

    fn location(&self) -> &str {
        &self.control_plane.spec.location
    }

    fn vnet_name(&self) -> &str {
        &self.control_plane.spec.virtual_network.name
    }

    fn vnet_resource_group(&self) -> &str {
        let vnet = &self.control_plane.spec.virtual_network;
        if vnet.resource_group.is_empty() {
            self.resource_group()
        } else {
            &vnet.resource_group
        }
    }

    fn node_subnet_name(&self) -> &str {
        &self.control_plane.spec.virtual_network.subnet.name
    }

    fn failure_domains(&self) -> Vec<String> {
        Vec::new()
    }

    fn additional_tags(&self) -> Tags {
        self.control_plane.spec.additional_tags.clone()
    }

    fn azure_clients(&self) -> &AzureClients {
        &self.azure_clients
    }
}
