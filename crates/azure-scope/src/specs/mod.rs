//! Per-resource specifications
//!
//! Each spec carries everything an executor needs to create, update or
//! delete one Azure resource idempotently. Scopes derive them from the
//! desired-state objects; they hold no references back into the scope.

pub mod dns;
pub mod group;
pub mod managed;
pub mod network;
pub mod scale_set;

pub use dns::{PrivateDnsLinkSpec, PrivateDnsRecordSpec, PrivateDnsSpec, PrivateDnsZoneSpec};
pub use group::{GroupSpec, TagsSpec};
pub use managed::{AgentPoolSpec, ManagedClusterSpec};
pub use network::{
    BastionHostSpec, LbRole, LbSpec, NatGatewaySpec, NsgSpec, PublicIpSpec, RouteTableSpec, SubnetSpec, VnetPeeringSpec,
    VnetSpec,
};
pub use scale_set::{SCALE_SETS_SERVICE_NAME, ScaleSetSpec};

/// Identity of the Azure resource a spec describes
pub trait ResourceSpecGetter {
    /// Name of the resource
    fn resource_name(&self) -> &str;

    /// Resource group holding it
    fn resource_group_name(&self) -> &str;

    /// Parent resource for child resources (subnet's VNet, record's zone); empty otherwise
    fn owner_resource_name(&self) -> &str {
        ""
    }
}

/// Any resource spec
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSpec {
    PublicIp(PublicIpSpec),
    LoadBalancer(LbSpec),
    Subnet(SubnetSpec),
    SecurityGroup(NsgSpec),
    RouteTable(RouteTableSpec),
    NatGateway(NatGatewaySpec),
    Vnet(VnetSpec),
    VnetPeering(VnetPeeringSpec),
    PrivateDnsZone(PrivateDnsZoneSpec),
    PrivateDnsLink(PrivateDnsLinkSpec),
    PrivateDnsRecord(PrivateDnsRecordSpec),
    BastionHost(BastionHostSpec),
    Group(GroupSpec),
    Tags(TagsSpec),
    ManagedCluster(ManagedClusterSpec),
    AgentPool(AgentPoolSpec),
    ScaleSet(ScaleSetSpec),
}

impl ResourceSpec {
    /// Service name used in futures and condition messages
    pub fn service_name(&self) -> &'static str {
        match self {
            ResourceSpec::PublicIp(_) => "publicips",
            ResourceSpec::LoadBalancer(_) => "loadbalancers",
            ResourceSpec::Subnet(_) => "subnets",
            ResourceSpec::SecurityGroup(_) => "securitygroups",
            ResourceSpec::RouteTable(_) => "routetables",
            ResourceSpec::NatGateway(_) => "natgateways",
            ResourceSpec::Vnet(_) => "virtualnetworks",
            ResourceSpec::VnetPeering(_) => "vnetpeerings",
            ResourceSpec::PrivateDnsZone(_) => "privatednszone",
            ResourceSpec::PrivateDnsLink(_) => "privatednslink",
            ResourceSpec::PrivateDnsRecord(_) => "privatednsrecord",
            ResourceSpec::BastionHost(_) => "bastionhosts",
            ResourceSpec::Group(_) => "group",
            ResourceSpec::Tags(_) => "tags",
            ResourceSpec::ManagedCluster(_) => "managedclusters",
            ResourceSpec::AgentPool(_) => "agentpools",
            ResourceSpec::ScaleSet(_) => SCALE_SETS_SERVICE_NAME,
        }
    }

    fn getter(&self) -> &dyn ResourceSpecGetter {
        match self {
            ResourceSpec::PublicIp(s) => s,
            ResourceSpec::LoadBalancer(s) => s,
            ResourceSpec::Subnet(s) => s,
            ResourceSpec::SecurityGroup(s) => s,
            ResourceSpec::RouteTable(s) => s,
            ResourceSpec::NatGateway(s) => s,
            ResourceSpec::Vnet(s) => s,
            ResourceSpec::VnetPeering(s) => s,
            ResourceSpec::PrivateDnsZone(s) => s,
            ResourceSpec::PrivateDnsLink(s) => s,
            ResourceSpec::PrivateDnsRecord(s) => s,
            ResourceSpec::BastionHost(s) => s,
            ResourceSpec::Group(s) => s,
            ResourceSpec::Tags(s) => s,
            ResourceSpec::ManagedCluster(s) => s,
            ResourceSpec::AgentPool(s) => s,
            ResourceSpec::ScaleSet(s) => s,
        }
    }
}

impl ResourceSpecGetter for ResourceSpec {
    fn resource_name(&self) -> &str {
        self.getter().resource_name()
    }

    fn resource_group_name(&self) -> &str {
        self.getter().resource_group_name()
    }

    fn owner_resource_name(&self) -> &str {
        self.getter().owner_resource_name()
    }
}

macro_rules! impl_from_spec {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ResourceSpec {
                fn from(spec: $ty) -> Self {
                    ResourceSpec::$variant(spec)
                }
            }
        )*
    };
}

impl_from_spec!(
    PublicIp => PublicIpSpec,
    LoadBalancer => LbSpec,
    Subnet => SubnetSpec,
    SecurityGroup => NsgSpec,
    RouteTable => RouteTableSpec,
    NatGateway => NatGatewaySpec,
    Vnet => VnetSpec,
    VnetPeering => VnetPeeringSpec,
    PrivateDnsZone => PrivateDnsZoneSpec,
    PrivateDnsLink => PrivateDnsLinkSpec,
    PrivateDnsRecord => PrivateDnsRecordSpec,
    BastionHost => BastionHostSpec,
    Group => GroupSpec,
    Tags => TagsSpec,
    ManagedCluster => ManagedClusterSpec,
    AgentPool => AgentPoolSpec,
    ScaleSet => ScaleSetSpec,
);
