//! Network resource specs

use crds::network::{
    BastionHostSku, ExtendedLocationSpec, FrontendIp, IpTag, LoadBalancerSku, LoadBalancerType, PublicIpSpec as PublicIpDecl,
    SecurityRule, ServiceEndpointSpec, SubnetRole,
};
use crds::tags::Tags;

use super::ResourceSpecGetter;

/// Public IP address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicIpSpec {
    pub name: String,
    pub resource_group: String,
    pub cluster_name: String,
    pub dns_name: Option<String>,
    pub is_ipv6: bool,
    pub location: String,
    pub extended_location: Option<ExtendedLocationSpec>,
    /// Zones, sorted ascending
    pub failure_domains: Vec<String>,
    pub additional_tags: Tags,
    pub ip_tags: Vec<IpTag>,
}

impl ResourceSpecGetter for PublicIpSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }
}

/// Purpose of a load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LbRole {
    #[default]
    ApiServer,
    NodeOutbound,
    ControlPlaneOutbound,
}

impl LbRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LbRole::ApiServer => "APIServer",
            LbRole::NodeOutbound => "NodeOutbound",
            LbRole::ControlPlaneOutbound => "ControlPlaneOutbound",
        }
    }
}

/// Load balancer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LbSpec {
    pub name: String,
    pub resource_group: String,
    pub subscription_id: String,
    pub cluster_name: String,
    pub location: String,
    pub extended_location: Option<ExtendedLocationSpec>,
    pub role: LbRole,
    pub type_: LoadBalancerType,
    pub sku: LoadBalancerSku,
    pub vnet_name: String,
    pub vnet_resource_group: String,
    /// Control plane subnet; API server load balancer only
    pub subnet_name: String,
    pub frontend_ip_configs: Vec<FrontendIp>,
    /// Zero for outbound load balancers
    pub api_server_port: i32,
    pub backend_pool_name: String,
    pub idle_timeout_in_minutes: Option<i32>,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for LbSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }
}

/// Subnet of the cluster VNet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetSpec {
    pub name: String,
    pub resource_group: String,
    pub subscription_id: String,
    pub cidrs: Vec<String>,
    pub vnet_name: String,
    pub vnet_resource_group: String,
    pub is_vnet_managed: bool,
    pub role: SubnetRole,
    pub security_group_name: String,
    pub route_table_name: String,
    pub nat_gateway_name: String,
    pub service_endpoints: Vec<ServiceEndpointSpec>,
}

impl ResourceSpecGetter for SubnetSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn owner_resource_name(&self) -> &str {
        &self.vnet_name
    }
}

/// Network security group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NsgSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub cluster_name: String,
    pub security_rules: Vec<SecurityRule>,
    /// Rules this controller applied on the previous pass
    pub last_applied_security_rules: Vec<SecurityRule>,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for NsgSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTableSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub cluster_name: String,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for RouteTableSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NatGatewaySpec {
    pub name: String,
    pub resource_group: String,
    pub subscription_id: String,
    pub location: String,
    pub cluster_name: String,
    pub nat_gateway_ip: PublicIpDecl,
    pub is_vnet_managed: bool,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for NatGatewaySpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }
}

/// Virtual network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VnetSpec {
    pub name: String,
    pub resource_group: String,
    pub cidrs: Vec<String>,
    pub location: String,
    pub extended_location: Option<ExtendedLocationSpec>,
    pub cluster_name: String,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for VnetSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }
}

/// One direction of a VNet peering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VnetPeeringSpec {
    /// `<source>-To-<remote>`
    pub peering_name: String,
    pub source_vnet_name: String,
    pub source_resource_group: String,
    pub remote_vnet_name: String,
    pub remote_resource_group: String,
    pub subscription_id: String,
    pub allow_forwarded_traffic: Option<bool>,
    pub allow_gateway_transit: Option<bool>,
    pub use_remote_gateways: Option<bool>,
}

impl ResourceSpecGetter for VnetPeeringSpec {
    fn resource_name(&self) -> &str {
        &self.peering_name
    }

    fn resource_group_name(&self) -> &str {
        &self.source_resource_group
    }

    fn owner_resource_name(&self) -> &str {
        &self.source_vnet_name
    }
}

/// Azure Bastion host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BastionHostSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub cluster_name: String,
    pub subnet_id: String,
    pub public_ip_id: String,
    pub sku: BastionHostSku,
    pub enable_tunneling: bool,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for BastionHostSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }
}
