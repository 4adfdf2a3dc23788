//! Network types shared by the Azure cluster CRDs
//!
//! VNet, subnets, load balancers, public IPs, peerings and bastion as the
//! user declares them. Defaulting fills the names these types reference
//! before any resource spec is derived.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tags::Tags;

/// Virtual network declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VnetSpec {
    /// Resource group holding the VNet (defaults to the cluster resource group)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_group: String,

    /// Azure resource ID; set when the VNet is brought by the user
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// VNet name
    #[serde(default)]
    pub name: String,

    /// Address space
    #[serde(default)]
    pub cidr_blocks: Vec<String>,

    /// Tags observed on (or applied to) the VNet
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,

    /// Peerings to other VNets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peerings: Vec<VnetPeeringSpec>,
}

/// A peering from the cluster VNet to a remote VNet
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VnetPeeringSpec {
    /// Resource group of the remote VNet (defaults to the cluster VNet resource group)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_group: String,

    /// Name of the remote VNet
    pub remote_vnet_name: String,

    /// Properties of the local to remote peering
    #[serde(default)]
    pub forward_peering_properties: VnetPeeringProperties,

    /// Properties of the remote to local peering
    #[serde(default)]
    pub reverse_peering_properties: VnetPeeringProperties,
}

/// Optional peering properties; `None` leaves the Azure default in place
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VnetPeeringProperties {
    /// Allow traffic forwarded from outside the peered VNet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_forwarded_traffic: Option<bool>,

    /// Allow the remote VNet to use this VNet's gateways
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_gateway_transit: Option<bool>,

    /// Use the remote VNet's gateways
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_remote_gateways: Option<bool>,
}

/// Role of a subnet inside the cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetRole {
    /// Control plane machines
    ControlPlane,
    /// Worker nodes
    #[default]
    Node,
    /// Azure Bastion
    Bastion,
}

impl SubnetRole {
    /// Wire value of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            SubnetRole::ControlPlane => "control-plane",
            SubnetRole::Node => "node",
            SubnetRole::Bastion => "bastion",
        }
    }
}

/// Subnet declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Role of the subnet
    #[serde(default)]
    pub role: SubnetRole,

    /// Subnet name
    #[serde(default)]
    pub name: String,

    /// Azure resource ID (observed)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Address prefixes
    #[serde(default)]
    pub cidr_blocks: Vec<String>,

    /// Network security group attached to the subnet
    #[serde(default)]
    pub security_group: SecurityGroup,

    /// Route table attached to the subnet
    #[serde(default)]
    pub route_table: RouteTable,

    /// NAT gateway attached to the subnet
    #[serde(default)]
    pub nat_gateway: NatGateway,

    /// Service endpoints enabled on the subnet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_endpoints: Vec<ServiceEndpointSpec>,
}

impl SubnetSpec {
    /// A NAT gateway name is set on the subnet
    pub fn is_nat_gateway_enabled(&self) -> bool {
        !self.nat_gateway.name.is_empty()
    }
}

/// Service endpoint enabled on a subnet
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpointSpec {
    /// Service type (e.g. "Microsoft.Storage")
    pub service: String,

    /// Locations the endpoint covers
    #[serde(default)]
    pub locations: Vec<String>,
}

/// Network security group declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    /// Azure resource ID (observed)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// NSG name
    #[serde(default)]
    pub name: String,

    /// Ingress and egress rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_rules: Vec<SecurityRule>,

    /// Tags on the NSG
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

/// Network protocol of a security rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum SecurityGroupProtocol {
    /// Any protocol
    #[default]
    #[serde(rename = "*")]
    All,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
}

/// Direction of a security rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum SecurityRuleDirection {
    /// Inbound traffic
    #[default]
    Inbound,
    /// Outbound traffic
    Outbound,
}

/// A single NSG rule
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    /// Rule name, unique inside the NSG
    pub name: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Protocol
    #[serde(default)]
    pub protocol: SecurityGroupProtocol,

    /// Direction
    #[serde(default)]
    pub direction: SecurityRuleDirection,

    /// Priority (100-4096, lower wins)
    #[serde(default)]
    pub priority: i32,

    /// Source port or range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ports: Option<String>,

    /// Destination port or range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ports: Option<String>,

    /// Source CIDR or tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Destination CIDR or tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

/// Route table declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTable {
    /// Azure resource ID (observed)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Route table name
    #[serde(default)]
    pub name: String,
}

/// NAT gateway declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NatGateway {
    /// Azure resource ID (observed)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// NAT gateway name; empty disables the gateway
    #[serde(default)]
    pub name: String,

    /// Public IP of the gateway
    #[serde(default)]
    pub nat_gateway_ip: PublicIpSpec,
}

/// Public IP declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpSpec {
    /// Public IP name
    #[serde(default)]
    pub name: String,

    /// DNS label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,

    /// IP tags (e.g. routing preference)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_tags: Vec<IpTag>,
}

/// Public IP tag
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IpTag {
    /// Tag type (e.g. "RoutingPreference")
    #[serde(rename = "type")]
    pub type_: String,

    /// Tag value (e.g. "Internet")
    pub tag: String,
}

/// Load balancer frontend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrontendIp {
    /// Frontend configuration name
    pub name: String,

    /// Public IP of a public frontend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<PublicIpSpec>,

    /// Private IP of an internal frontend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
}

/// Load balancer exposure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum LoadBalancerType {
    /// Internet facing
    #[default]
    Public,
    /// VNet only
    Internal,
}

/// Load balancer SKU
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum LoadBalancerSku {
    /// Standard SKU (the only one supported)
    #[default]
    Standard,
}

/// Backend address pool
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendPool {
    /// Pool name
    #[serde(default)]
    pub name: String,
}

/// Load balancer declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    /// Azure resource ID (observed)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Load balancer name
    #[serde(default)]
    pub name: String,

    /// Explicit frontend configurations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frontend_ips: Vec<FrontendIp>,

    /// Number of generated frontends when none are declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_ips_count: Option<i32>,

    /// Backend pool
    #[serde(default)]
    pub backend_pool: BackendPool,

    /// Public or internal
    #[serde(default, rename = "type")]
    pub type_: LoadBalancerType,

    /// SKU
    #[serde(default)]
    pub sku: LoadBalancerSku,

    /// TCP idle timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_in_minutes: Option<i32>,
}

/// Cluster network declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Virtual network
    #[serde(default)]
    pub vnet: VnetSpec,

    /// Subnets (one control-plane subnet, at least one node subnet)
    #[serde(default)]
    pub subnets: Vec<SubnetSpec>,

    /// API server load balancer
    #[serde(default, rename = "apiServerLB")]
    pub api_server_lb: LoadBalancerSpec,

    /// Outbound load balancer for worker nodes
    #[serde(default, rename = "nodeOutboundLB", skip_serializing_if = "Option::is_none")]
    pub node_outbound_lb: Option<LoadBalancerSpec>,

    /// Outbound load balancer for control plane nodes
    #[serde(default, rename = "controlPlaneOutboundLB", skip_serializing_if = "Option::is_none")]
    pub control_plane_outbound_lb: Option<LoadBalancerSpec>,

    /// Private DNS zone name for internal API servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_dns_zone_name: Option<String>,
}

impl NetworkSpec {
    /// First subnet with the control-plane role
    pub fn control_plane_subnet(&self) -> Option<&SubnetSpec> {
        self.subnets.iter().find(|s| s.role == SubnetRole::ControlPlane)
    }

    /// Mutable control-plane subnet
    pub fn control_plane_subnet_mut(&mut self) -> Option<&mut SubnetSpec> {
        self.subnets.iter_mut().find(|s| s.role == SubnetRole::ControlPlane)
    }

    /// Every subnet with the node role
    pub fn node_subnets(&self) -> impl Iterator<Item = &SubnetSpec> {
        self.subnets.iter().filter(|s| s.role == SubnetRole::Node)
    }

    /// Subnet by name
    pub fn subnet(&self, name: &str) -> Option<&SubnetSpec> {
        self.subnets.iter().find(|s| s.name == name)
    }

    /// The API server load balancer is internal
    pub fn is_api_server_private(&self) -> bool {
        self.api_server_lb.type_ == LoadBalancerType::Internal
    }
}

/// Bastion declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BastionSpec {
    /// Azure Bastion host; `None` disables the bastion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_bastion: Option<AzureBastion>,
}

/// Azure Bastion host
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureBastion {
    /// Bastion host name
    #[serde(default)]
    pub name: String,

    /// Dedicated bastion subnet
    #[serde(default)]
    pub subnet: SubnetSpec,

    /// Public IP of the bastion
    #[serde(default, rename = "publicIP")]
    pub public_ip: PublicIpSpec,

    /// Bastion SKU
    #[serde(default)]
    pub sku: BastionHostSku,

    /// Native client tunneling (Standard SKU only)
    #[serde(default)]
    pub enable_tunneling: bool,
}

/// Bastion SKU
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum BastionHostSku {
    /// Basic SKU
    #[default]
    Basic,
    /// Standard SKU
    Standard,
}

/// Azure extended location (edge zones)
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedLocationSpec {
    /// Extended location name
    pub name: String,

    /// Extended location type (e.g. "EdgeZone")
    #[serde(rename = "type")]
    pub type_: String,
}
