//! Scope for a self-managed AzureCluster
//!
//! Holds the Cluster API cluster and its AzureCluster for one pass and
//! projects the AzureCluster into per-resource specs. Derivations are pure:
//! they read the snapshot and never suspend.

use std::collections::BTreeSet;
use std::sync::Arc;

use azure_credentials::AzureClients;
use crds::cluster_api::{ApiEndpoint, FailureDomainSpec};
use crds::conditions::{
    self, BASTION_HOST_READY, CLUSTER_OWNED_CONDITIONS, ConditionType, LOAD_BALANCERS_READY, NAT_GATEWAYS_READY,
    PRIVATE_DNS_LINK_READY, PRIVATE_DNS_RECORD_READY, PRIVATE_DNS_ZONE_READY, PUBLIC_IPS_READY, RESOURCE_GROUP_READY,
    ROUTE_TABLES_READY, SECURITY_GROUPS_READY, SUBNETS_READY, VNET_PEERING_READY, VNET_READY,
};
use crds::defaults::{
    DEFAULT_INTERNAL_LB_IP_ADDRESS, generate_control_plane_outbound_ip_name, generate_nat_gateway_ip_name,
    generate_node_outbound_ip_name, generate_outbound_frontends, generate_private_dns_zone_name,
};
use crds::futures::{Future, FutureType};
use crds::network::{
    FrontendIp, LoadBalancerSpec, PublicIpSpec as PublicIpDecl, SecurityGroupProtocol, SecurityRule,
    SecurityRuleDirection, SubnetRole, SubnetSpec as SubnetDecl,
};
use crds::tags::{self as ownership, Tags};
use crds::{AzureCluster, Cluster};
use tracing::{debug, info};

use crate::cache::ClusterCache;
use crate::conditions::{set_summary, update_delete_status, update_patch_status, update_put_status};
use crate::error::{OperationError, ScopeError};
use crate::lro;
use crate::names;
use crate::patch::PatchHelper;
use crate::scope::ClusterScoper;
use crate::scope_trait::{ObjectKind, ScopeClient};
use crate::specs::dns::PRIVATE_API_SERVER_HOSTNAME;
use crate::specs::{
    BastionHostSpec, GroupSpec, LbRole, LbSpec, NatGatewaySpec, NsgSpec, PrivateDnsLinkSpec, PrivateDnsRecordSpec,
    PrivateDnsSpec, PrivateDnsZoneSpec, PublicIpSpec, ResourceSpec, RouteTableSpec, SubnetSpec, TagsSpec,
    VnetPeeringSpec, VnetSpec,
};
use crate::tags::{
    RESOURCE_GROUP_TAGS_LAST_APPLIED_ANNOTATION, SECURITY_RULES_LAST_APPLIED_ANNOTATION, annotation_json,
    update_annotation_json,
};

/// Priority of the default SSH rule on the control plane NSG
pub const SSH_RULE_PRIORITY: i32 = 2200;
/// Priority of the default API server rule on the control plane NSG
pub const API_SERVER_RULE_PRIORITY: i32 = 2201;

/// Inputs of [`ClusterScope::new`]
pub struct ClusterScopeParams {
    pub client: Arc<dyn ScopeClient>,
    pub azure_clients: AzureClients,
    pub cluster: Cluster,
    pub azure_cluster: AzureCluster,
}

/// Specs of one resource family and the condition that reports on them
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpecs {
    pub condition: ConditionType,
    pub specs: Vec<ResourceSpec>,
}

/// Per-pass scope over an AzureCluster
pub struct ClusterScope {
    client: Arc<dyn ScopeClient>,
    azure_clients: AzureClients,
    patch_helper: PatchHelper,
    cache: ClusterCache,
    cluster_name: String,
    pub cluster: Cluster,
    pub azure_cluster: AzureCluster,
}

impl ClusterScope {
    /// Resolve credentials and snapshot the AzureCluster
    pub async fn new(params: ClusterScopeParams) -> Result<Self, ScopeError> {
        let ClusterScopeParams {
            client,
            mut azure_clients,
            cluster,
            azure_cluster,
        } = params;

        let cluster_name = cluster
            .metadata
            .name
            .clone()
            .ok_or_else(|| ScopeError::InvalidInput("Cluster has no name".to_string()))?;
        let namespace = azure_cluster.metadata.namespace.clone().unwrap_or_default();

        match &azure_cluster.spec.identity_ref {
            Some(identity_ref) => {
                let provider =
                    crate::identity::IdentityCredentialsProvider::load(client.as_ref(), identity_ref, &namespace)
                        .await?;
                azure_clients
                    .set_credentials_with_provider(
                        &azure_cluster.spec.subscription_id,
                        &azure_cluster.spec.azure_environment,
                        &provider,
                    )
                    .await?;
            }
            None => {
                azure_clients.set_credentials(
                    &azure_cluster.spec.subscription_id,
                    &azure_cluster.spec.azure_environment,
                )?;
            }
        }

        let patch_helper = PatchHelper::new(ObjectKind::AzureCluster, &azure_cluster)?;
        debug!(cluster = %cluster_name, namespace = %namespace, "built cluster scope");

        Ok(Self {
            client,
            azure_clients,
            patch_helper,
            cache: ClusterCache::new(),
            cluster_name,
            cluster,
            azure_cluster,
        })
    }

    fn network(&self) -> &crds::network::NetworkSpec {
        &self.azure_cluster.spec.network_spec
    }

    /// API server load balancer is internal
    pub fn is_api_server_private(&self) -> bool {
        self.network().is_api_server_private()
    }

    /// The VNet was created for this cluster rather than brought by the user
    pub fn is_vnet_managed(&self) -> bool {
        let vnet = &self.network().vnet;
        self.cache
            .is_vnet_managed(|| vnet.id.is_empty() || ownership::has_owned(&vnet.tags, &self.cluster_name))
    }

    /// API server port from the Cluster network, 6443 when unset
    pub fn api_server_port(&self) -> i32 {
        self.cluster.api_server_port()
    }

    /// Private IP of an internal API server
    pub fn api_server_private_ip(&self) -> String {
        self.network()
            .api_server_lb
            .frontend_ips
            .first()
            .and_then(|f| f.private_ip_address.clone())
            .unwrap_or_else(|| DEFAULT_INTERNAL_LB_IP_ADDRESS.to_string())
    }

    /// Private DNS zone of an internal API server
    pub fn private_dns_zone_name(&self) -> String {
        self.network()
            .private_dns_zone_name
            .clone()
            .unwrap_or_else(|| generate_private_dns_zone_name(&self.cluster_name))
    }

    /// Host clients use to reach the API server
    pub fn api_server_host(&self) -> String {
        if self.is_api_server_private() {
            return format!("{PRIVATE_API_SERVER_HOSTNAME}.{}", self.private_dns_zone_name());
        }
        self.network()
            .api_server_lb
            .frontend_ips
            .first()
            .and_then(|f| f.public_ip.as_ref())
            .and_then(|ip| ip.dns_name.clone())
            .unwrap_or_default()
    }

    /// Public IP DNS name for `ip_name`
    pub fn generate_fqdn(&self, ip_name: &str) -> String {
        names::generate_fqdn(
            &self.cluster_name,
            self.azure_clients.subscription_id(),
            self.resource_group(),
            ip_name,
            self.location(),
            self.azure_clients.vm_dns_suffix(),
        )
    }

    /// IP name and FQDN for clusters created without an API server load balancer
    #[deprecated(note = "only for clusters created without an API server load balancer; use generate_fqdn")]
    pub fn generate_legacy_fqdn(&self) -> (String, String) {
        names::generate_legacy_fqdn(
            &self.cluster_name,
            self.azure_clients.subscription_id(),
            self.resource_group(),
            self.location(),
            self.azure_clients.vm_dns_suffix(),
        )
    }

    /// Public IP of a subnet's NAT gateway, named `pip-<cluster>-<subnet>-natgw` when unnamed
    fn nat_gateway_ip(&self, subnet: &SubnetDecl) -> PublicIpDecl {
        let mut ip = subnet.nat_gateway.nat_gateway_ip.clone();
        if ip.name.is_empty() {
            ip.name = generate_nat_gateway_ip_name(&self.cluster_name, &subnet.name);
        }
        ip
    }

    fn public_ip(&self, decl: &PublicIpDecl, failure_domains: &[String]) -> PublicIpSpec {
        PublicIpSpec {
            name: decl.name.clone(),
            resource_group: self.resource_group().to_string(),
            cluster_name: self.cluster_name.clone(),
            dns_name: decl.dns_name.clone(),
            is_ipv6: false,
            location: self.location().to_string(),
            extended_location: self.azure_cluster.spec.extended_location.clone(),
            failure_domains: failure_domains.to_vec(),
            additional_tags: self.additional_tags(),
            ip_tags: decl.ip_tags.clone(),
        }
    }

    /// Frontends of an outbound load balancer, generated from its count when none are declared
    fn outbound_frontends(lb: &LoadBalancerSpec, ip_name: &str) -> Vec<FrontendIp> {
        if !lb.frontend_ips.is_empty() {
            return lb.frontend_ips.clone();
        }
        let count = lb.frontend_ips_count.and_then(|c| usize::try_from(c).ok()).unwrap_or(0);
        generate_outbound_frontends(&lb.name, ip_name, count)
    }

    fn control_plane_outbound_frontends(&self) -> Vec<FrontendIp> {
        self.network()
            .control_plane_outbound_lb
            .as_ref()
            .map(|lb| Self::outbound_frontends(lb, &generate_control_plane_outbound_ip_name(&self.cluster_name)))
            .unwrap_or_default()
    }

    fn node_outbound_frontends(&self) -> Vec<FrontendIp> {
        self.network()
            .node_outbound_lb
            .as_ref()
            .map(|lb| Self::outbound_frontends(lb, &generate_node_outbound_ip_name(&self.cluster_name)))
            .unwrap_or_default()
    }

    /// Public IPs: API server or control plane outbound, node outbound, NAT gateways, bastion.
    ///
    /// Names are unique; the first occurrence wins.
    pub fn public_ip_specs(&self) -> Vec<PublicIpSpec> {
        let network = self.network();
        let failure_domains = self.failure_domains();
        let mut decls: Vec<PublicIpDecl> = Vec::new();

        if self.is_api_server_private() {
            decls.extend(
                self.control_plane_outbound_frontends()
                    .into_iter()
                    .filter_map(|f| f.public_ip),
            );
        } else {
            // IPv4 only: Azure needs an IPv4 rule on the API server LB even in dual-stack VNets.
            decls.extend(
                network
                    .api_server_lb
                    .frontend_ips
                    .iter()
                    .filter_map(|f| f.public_ip.clone()),
            );
        }

        decls.extend(self.node_outbound_frontends().into_iter().filter_map(|f| f.public_ip));

        for subnet in network.node_subnets().filter(|s| s.is_nat_gateway_enabled()) {
            decls.push(self.nat_gateway_ip(subnet));
        }

        if let Some(bastion) = &self.azure_cluster.spec.bastion_spec.azure_bastion {
            decls.push(bastion.public_ip.clone());
        }

        let mut seen = BTreeSet::new();
        decls
            .iter()
            .filter(|d| !d.name.is_empty() && seen.insert(d.name.clone()))
            .map(|d| self.public_ip(d, &failure_domains))
            .collect()
    }

    fn lb_spec(&self, lb: &LoadBalancerSpec, role: LbRole, frontends: Vec<FrontendIp>) -> LbSpec {
        LbSpec {
            name: lb.name.clone(),
            resource_group: self.resource_group().to_string(),
            subscription_id: self.subscription_id().to_string(),
            cluster_name: self.cluster_name.clone(),
            location: self.location().to_string(),
            extended_location: self.azure_cluster.spec.extended_location.clone(),
            role,
            type_: lb.type_,
            sku: lb.sku,
            vnet_name: self.vnet_name().to_string(),
            vnet_resource_group: self.vnet_resource_group().to_string(),
            subnet_name: String::new(),
            frontend_ip_configs: frontends,
            api_server_port: 0,
            backend_pool_name: lb.backend_pool.name.clone(),
            idle_timeout_in_minutes: lb.idle_timeout_in_minutes,
            additional_tags: self.additional_tags(),
        }
    }

    /// API server load balancer, then the optional outbound load balancers
    pub fn lb_specs(&self) -> Vec<LbSpec> {
        let network = self.network();
        let api_lb = &network.api_server_lb;
        let mut specs = vec![LbSpec {
            subnet_name: network
                .control_plane_subnet()
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            api_server_port: self.api_server_port(),
            ..self.lb_spec(api_lb, LbRole::ApiServer, api_lb.frontend_ips.clone())
        }];

        if let Some(lb) = &network.node_outbound_lb {
            specs.push(self.lb_spec(lb, LbRole::NodeOutbound, self.node_outbound_frontends()));
        }
        if let Some(lb) = &network.control_plane_outbound_lb {
            specs.push(self.lb_spec(lb, LbRole::ControlPlaneOutbound, self.control_plane_outbound_frontends()));
        }
        specs
    }

    fn subnet_spec(&self, subnet: &SubnetDecl) -> SubnetSpec {
        SubnetSpec {
            name: subnet.name.clone(),
            resource_group: self.resource_group().to_string(),
            subscription_id: self.subscription_id().to_string(),
            cidrs: subnet.cidr_blocks.clone(),
            vnet_name: self.vnet_name().to_string(),
            vnet_resource_group: self.vnet_resource_group().to_string(),
            is_vnet_managed: self.is_vnet_managed(),
            role: subnet.role,
            security_group_name: subnet.security_group.name.clone(),
            route_table_name: subnet.route_table.name.clone(),
            nat_gateway_name: subnet.nat_gateway.name.clone(),
            service_endpoints: subnet.service_endpoints.clone(),
        }
    }

    /// Declared subnets, bastion subnet last
    pub fn subnet_specs(&self) -> Vec<SubnetSpec> {
        let mut specs: Vec<SubnetSpec> = self.network().subnets.iter().map(|s| self.subnet_spec(s)).collect();
        if let Some(bastion) = &self.azure_cluster.spec.bastion_spec.azure_bastion {
            specs.push(self.subnet_spec(&bastion.subnet));
        }
        specs
    }

    /// One NSG per distinct security group name, with the rules applied last time
    pub fn nsg_specs(&self) -> Result<Vec<NsgSpec>, ScopeError> {
        let last_applied = self.annotation_security_rules()?;
        let mut seen = BTreeSet::new();
        Ok(self
            .network()
            .subnets
            .iter()
            .filter(|s| !s.security_group.name.is_empty() && seen.insert(s.security_group.name.clone()))
            .map(|s| NsgSpec {
                name: s.security_group.name.clone(),
                resource_group: self.resource_group().to_string(),
                location: self.location().to_string(),
                cluster_name: self.cluster_name.clone(),
                security_rules: s.security_group.security_rules.clone(),
                last_applied_security_rules: last_applied.get(&s.security_group.name).cloned().unwrap_or_default(),
                additional_tags: self.additional_tags(),
            })
            .collect())
    }

    pub fn route_table_specs(&self) -> Vec<RouteTableSpec> {
        let mut seen = BTreeSet::new();
        self.network()
            .subnets
            .iter()
            .filter(|s| !s.route_table.name.is_empty() && seen.insert(s.route_table.name.clone()))
            .map(|s| RouteTableSpec {
                name: s.route_table.name.clone(),
                resource_group: self.resource_group().to_string(),
                location: self.location().to_string(),
                cluster_name: self.cluster_name.clone(),
                additional_tags: self.additional_tags(),
            })
            .collect()
    }

    /// NAT gateways of node subnets, one per gateway name.
    ///
    /// Control plane egress goes through a load balancer, so control plane
    /// subnets never contribute a gateway.
    pub fn nat_gateway_specs(&self) -> Vec<NatGatewaySpec> {
        let mut seen = BTreeSet::new();
        self.network()
            .subnets
            .iter()
            .filter(|s| s.role != SubnetRole::ControlPlane && s.is_nat_gateway_enabled())
            .filter(|s| seen.insert(s.nat_gateway.name.clone()))
            .map(|s| NatGatewaySpec {
                name: s.nat_gateway.name.clone(),
                resource_group: self.resource_group().to_string(),
                subscription_id: self.subscription_id().to_string(),
                location: self.location().to_string(),
                cluster_name: self.cluster_name.clone(),
                nat_gateway_ip: self.nat_gateway_ip(s),
                is_vnet_managed: self.is_vnet_managed(),
                additional_tags: self.additional_tags(),
            })
            .collect()
    }

    pub fn vnet_spec(&self) -> VnetSpec {
        let vnet = &self.network().vnet;
        VnetSpec {
            name: vnet.name.clone(),
            resource_group: self.vnet_resource_group().to_string(),
            cidrs: vnet.cidr_blocks.clone(),
            location: self.location().to_string(),
            extended_location: self.azure_cluster.spec.extended_location.clone(),
            cluster_name: self.cluster_name.clone(),
            additional_tags: self.additional_tags(),
        }
    }

    /// Two specs per declared peering: local to remote at `2i`, remote to local at `2i+1`
    pub fn vnet_peering_specs(&self) -> Vec<VnetPeeringSpec> {
        let vnet = &self.network().vnet;
        let local_name = vnet.name.as_str();
        let local_group = self.vnet_resource_group();

        vnet.peerings
            .iter()
            .flat_map(|peering| {
                let remote_group = if peering.resource_group.is_empty() {
                    local_group
                } else {
                    peering.resource_group.as_str()
                };
                let forward = &peering.forward_peering_properties;
                let reverse = &peering.reverse_peering_properties;
                [
                    VnetPeeringSpec {
                        peering_name: format!("{local_name}-To-{}", peering.remote_vnet_name),
                        source_vnet_name: local_name.to_string(),
                        source_resource_group: local_group.to_string(),
                        remote_vnet_name: peering.remote_vnet_name.clone(),
                        remote_resource_group: remote_group.to_string(),
                        subscription_id: self.subscription_id().to_string(),
                        allow_forwarded_traffic: forward.allow_forwarded_traffic,
                        allow_gateway_transit: forward.allow_gateway_transit,
                        use_remote_gateways: forward.use_remote_gateways,
                    },
                    VnetPeeringSpec {
                        peering_name: format!("{}-To-{local_name}", peering.remote_vnet_name),
                        source_vnet_name: peering.remote_vnet_name.clone(),
                        source_resource_group: remote_group.to_string(),
                        remote_vnet_name: local_name.to_string(),
                        remote_resource_group: local_group.to_string(),
                        subscription_id: self.subscription_id().to_string(),
                        allow_forwarded_traffic: reverse.allow_forwarded_traffic,
                        allow_gateway_transit: reverse.allow_gateway_transit,
                        use_remote_gateways: reverse.use_remote_gateways,
                    },
                ]
            })
            .collect()
    }

    /// Zone, links and API server record; `None` unless the API server is internal
    pub fn private_dns_spec(&self) -> Option<PrivateDnsSpec> {
        if !self.is_api_server_private() {
            return None;
        }
        let zone_name = self.private_dns_zone_name();
        let vnet = &self.network().vnet;

        let link = |vnet_name: &str, vnet_group: &str| PrivateDnsLinkSpec {
            link_name: format!("{vnet_name}-link"),
            zone_name: zone_name.clone(),
            subscription_id: self.subscription_id().to_string(),
            resource_group: self.resource_group().to_string(),
            vnet_name: vnet_name.to_string(),
            vnet_resource_group: vnet_group.to_string(),
            cluster_name: self.cluster_name.clone(),
            additional_tags: self.additional_tags(),
        };

        let mut links = vec![link(&vnet.name, self.vnet_resource_group())];
        links.extend(vnet.peerings.iter().map(|p| {
            let group = if p.resource_group.is_empty() {
                self.vnet_resource_group()
            } else {
                p.resource_group.as_str()
            };
            link(&p.remote_vnet_name, group)
        }));

        Some(PrivateDnsSpec {
            zone: PrivateDnsZoneSpec {
                name: zone_name.clone(),
                resource_group: self.resource_group().to_string(),
                cluster_name: self.cluster_name.clone(),
                additional_tags: self.additional_tags(),
            },
            links,
            records: vec![PrivateDnsRecordSpec {
                hostname: PRIVATE_API_SERVER_HOSTNAME.to_string(),
                ip: self.api_server_private_ip(),
                zone_name,
                resource_group: self.resource_group().to_string(),
            }],
        })
    }

    pub fn azure_bastion_spec(&self) -> Option<BastionHostSpec> {
        let bastion = self.azure_cluster.spec.bastion_spec.azure_bastion.as_ref()?;
        Some(BastionHostSpec {
            name: bastion.name.clone(),
            resource_group: self.resource_group().to_string(),
            location: self.location().to_string(),
            cluster_name: self.cluster_name.clone(),
            subnet_id: names::subnet_id(
                self.subscription_id(),
                self.vnet_resource_group(),
                self.vnet_name(),
                &bastion.subnet.name,
            ),
            public_ip_id: names::public_ip_id(self.subscription_id(), self.resource_group(), &bastion.public_ip.name),
            sku: bastion.sku,
            enable_tunneling: bastion.enable_tunneling,
            additional_tags: self.additional_tags(),
        })
    }

    pub fn group_spec(&self) -> GroupSpec {
        GroupSpec {
            name: self.resource_group().to_string(),
            location: self.location().to_string(),
            cluster_name: self.cluster_name.clone(),
            additional_tags: self.additional_tags(),
        }
    }

    /// Tags kept on the resource group, tracked through the last-applied annotation
    pub fn tags_specs(&self) -> Result<Vec<TagsSpec>, ScopeError> {
        let annotation = RESOURCE_GROUP_TAGS_LAST_APPLIED_ANNOTATION;
        Ok(vec![TagsSpec {
            scope: names::resource_group_id(self.subscription_id(), self.resource_group()),
            tags: self.additional_tags(),
            annotation: annotation.to_string(),
            last_applied: self.annotation_tags(annotation)?,
        }])
    }

    /// Every resource family in the order they are created; empty families are skipped
    pub fn resource_specs(&self) -> Result<Vec<ServiceSpecs>, ScopeError> {
        fn family<T: Into<ResourceSpec>>(condition: ConditionType, specs: Vec<T>) -> ServiceSpecs {
            ServiceSpecs {
                condition,
                specs: specs.into_iter().map(Into::into).collect(),
            }
        }

        let mut families = vec![
            family(RESOURCE_GROUP_READY, vec![self.group_spec()]),
            family(RESOURCE_GROUP_READY, self.tags_specs()?),
            family(VNET_READY, vec![self.vnet_spec()]),
            family(SECURITY_GROUPS_READY, self.nsg_specs()?),
            family(ROUTE_TABLES_READY, self.route_table_specs()),
            family(PUBLIC_IPS_READY, self.public_ip_specs()),
            family(NAT_GATEWAYS_READY, self.nat_gateway_specs()),
            family(SUBNETS_READY, self.subnet_specs()),
            family(VNET_PEERING_READY, self.vnet_peering_specs()),
            family(LOAD_BALANCERS_READY, self.lb_specs()),
        ];
        if let Some(dns) = self.private_dns_spec() {
            families.push(family(PRIVATE_DNS_ZONE_READY, vec![dns.zone]));
            families.push(family(PRIVATE_DNS_LINK_READY, dns.links));
            families.push(family(PRIVATE_DNS_RECORD_READY, dns.records));
        }
        families.push(family(
            BASTION_HOST_READY,
            self.azure_bastion_spec().map_or_else(Vec::new, |b| vec![b]),
        ));

        families.retain(|f| !f.specs.is_empty());
        Ok(families)
    }

    /// Apply AzureCluster defaults and the API server FQDN
    pub fn set_defaults(&mut self) {
        self.azure_cluster.set_defaults(&self.cluster_name);

        if self.is_api_server_private() {
            return;
        }
        // Clusters created before the API server load balancer keep their IP and DNS name
        #[allow(deprecated)]
        let (legacy_ip_name, legacy_fqdn) = self.generate_legacy_fqdn();
        let fqdns: Vec<Option<String>> = self
            .network()
            .api_server_lb
            .frontend_ips
            .iter()
            .map(|f| {
                f.public_ip
                    .as_ref()
                    .filter(|ip| ip.dns_name.is_none())
                    .map(|ip| {
                        if ip.name == legacy_ip_name {
                            legacy_fqdn.clone()
                        } else {
                            self.generate_fqdn(&ip.name)
                        }
                    })
            })
            .collect();
        for (frontend, fqdn) in self
            .azure_cluster
            .spec
            .network_spec
            .api_server_lb
            .frontend_ips
            .iter_mut()
            .zip(fqdns)
        {
            if let (Some(ip), Some(fqdn)) = (frontend.public_ip.as_mut(), fqdn) {
                ip.dns_name = Some(fqdn);
            }
        }
    }

    /// Install SSH and API server rules on a control plane subnet that has none.
    ///
    /// Runs here rather than at admission because the port comes from the
    /// Cluster object.
    pub fn set_control_plane_security_rules(&mut self) {
        let port = self.api_server_port();
        let Some(subnet) = self.azure_cluster.spec.network_spec.control_plane_subnet_mut() else {
            return;
        };
        if !subnet.security_group.security_rules.is_empty() {
            return;
        }
        let rule = |name: &str, description: &str, priority: i32, port: String| SecurityRule {
            name: name.to_string(),
            description: description.to_string(),
            protocol: SecurityGroupProtocol::Tcp,
            direction: SecurityRuleDirection::Inbound,
            priority,
            source_ports: Some("*".to_string()),
            destination_ports: Some(port),
            source: Some("*".to_string()),
            destination: Some("*".to_string()),
        };
        subnet.security_group.security_rules = vec![
            rule("allow_ssh", "Allow SSH", SSH_RULE_PRIORITY, "22".to_string()),
            rule("allow_apiserver", "Allow K8s API Server", API_SERVER_RULE_PRIORITY, port.to_string()),
        ];
    }

    /// Record a discovered failure domain.
    ///
    /// A user override can only turn `controlPlane` off.
    pub fn set_failure_domain(&mut self, id: &str, mut spec: FailureDomainSpec) {
        if self
            .azure_cluster
            .spec
            .failure_domains
            .get(id)
            .is_some_and(|fd| !fd.control_plane)
        {
            spec.control_plane = false;
        }
        self.azure_cluster
            .status
            .get_or_insert_with(Default::default)
            .failure_domains
            .insert(id.to_string(), spec);
    }

    pub fn set_control_plane_endpoint(&mut self, endpoint: ApiEndpoint) {
        self.azure_cluster.spec.control_plane_endpoint = endpoint;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.azure_cluster.status.get_or_insert_with(Default::default).ready = ready;
    }

    pub fn set_long_running_operation_state(&mut self, future: Future) {
        lro::set(&mut self.azure_cluster, future);
    }

    pub fn get_long_running_operation_state(&self, name: &str, service: &str, type_: FutureType) -> Option<Future> {
        lro::get(&self.azure_cluster, name, service, type_).cloned()
    }

    pub fn delete_long_running_operation_state(&mut self, name: &str, service: &str, type_: FutureType) {
        lro::delete(&mut self.azure_cluster, name, service, type_);
    }

    pub fn update_put_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_put_status(&mut self.azure_cluster, condition, service, err);
    }

    pub fn update_patch_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_patch_status(&mut self.azure_cluster, condition, service, err);
    }

    pub fn update_delete_status(&mut self, condition: &str, service: &str, err: Option<&OperationError>) {
        update_delete_status(&mut self.azure_cluster, condition, service, err);
    }

    /// Security rules applied last time, keyed by NSG name
    pub fn annotation_security_rules(&self) -> Result<std::collections::BTreeMap<String, Vec<SecurityRule>>, ScopeError> {
        annotation_json(&self.azure_cluster.metadata, SECURITY_RULES_LAST_APPLIED_ANNOTATION)
    }

    /// Record the rules just applied to `nsg_name`
    pub fn update_annotation_security_rules(&mut self, nsg_name: &str, rules: Vec<SecurityRule>) -> Result<(), ScopeError> {
        let mut applied = self.annotation_security_rules()?;
        if rules.is_empty() {
            applied.remove(nsg_name);
        } else {
            applied.insert(nsg_name.to_string(), rules);
        }
        update_annotation_json(&mut self.azure_cluster.metadata, SECURITY_RULES_LAST_APPLIED_ANNOTATION, &applied)
    }

    /// Tags recorded under a last-applied annotation
    pub fn annotation_tags(&self, annotation: &str) -> Result<Tags, ScopeError> {
        annotation_json(&self.azure_cluster.metadata, annotation)
    }

    pub fn update_annotation_tags(&mut self, annotation: &str, tags: &Tags) -> Result<(), ScopeError> {
        update_annotation_json(&mut self.azure_cluster.metadata, annotation, tags)
    }

    /// Summarise conditions and patch the AzureCluster
    pub async fn close(mut self) -> Result<(), ScopeError> {
        set_summary(&mut self.azure_cluster, CLUSTER_OWNED_CONDITIONS);
        if conditions::is_true(&self.azure_cluster, conditions::READY) {
            info!(cluster = %self.cluster_name, "cluster infrastructure ready");
        }
        self.patch_helper.patch(self.client.as_ref(), &self.azure_cluster).await
    }
}

impl ClusterScoper for ClusterScope {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn namespace(&self) -> &str {
        self.azure_cluster.metadata.namespace.as_deref().unwrap_or_default()
    }

    fn subscription_id(&self) -> &str {
        self.azure_clients.subscription_id()
    }

    fn resource_group(&self) -> &str {
        &self.azure_cluster.spec.resource_group
    }

    fn node_resource_group(&self) -> &str {
        &self.azure_cluster.spec.resource_group
    }

    fn location(&self) -> &str {
        &self.azure_cluster.spec.location
    }

    fn vnet_name(&self) -> &str {
        &self.network().vnet.name
    }

    fn vnet_resource_group(&self) -> &str {
        let vnet = &self.network().vnet;
        if vnet.resource_group.is_empty() {
            self.resource_group()
        } else {
            &vnet.resource_group
        }
    }

    fn node_subnet_name(&self) -> &str {
        self.network()
            .node_subnets()
            .next()
            .map(|s| s.name.as_str())
            .unwrap_or_default()
    }

    fn failure_domains(&self) -> Vec<String> {
        self.azure_cluster
            .status
            .as_ref()
            .map(|s| s.failure_domains.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn additional_tags(&self) -> Tags {
        self.azure_cluster.spec.additional_tags.clone()
    }

    fn azure_clients(&self) -> &AzureClients {
        &self.azure_clients
    }
}
