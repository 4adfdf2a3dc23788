//! AzureCluster defaulting
//!
//! Fills every name the resource spec derivations cross-reference. Defaulting
//! is idempotent: values the user set are never overwritten, so running it on
//! each reconcile pass yields the same object.

use crate::azure_cluster::AzureCluster;
use crate::network::{
    BackendPool, FrontendIp, LoadBalancerSku, LoadBalancerSpec, LoadBalancerType, NetworkSpec, PublicIpSpec,
    SubnetRole, SubnetSpec,
};

/// Default VNet address space
pub const DEFAULT_VNET_CIDR: &str = "10.0.0.0/8";
/// Default control plane subnet prefix
pub const DEFAULT_CONTROL_PLANE_SUBNET_CIDR: &str = "10.0.0.0/16";
/// Default node subnet prefix
pub const DEFAULT_NODE_SUBNET_CIDR: &str = "10.1.0.0/16";
/// Default private IP of an internal API server load balancer
pub const DEFAULT_INTERNAL_LB_IP_ADDRESS: &str = "10.0.0.100";
/// Default load balancer idle timeout
pub const DEFAULT_OUTBOUND_LB_IDLE_TIMEOUT_IN_MINUTES: i32 = 4;
/// Subnet name Azure requires for bastion hosts
pub const DEFAULT_AZURE_BASTION_SUBNET_NAME: &str = "AzureBastionSubnet";
/// Default bastion subnet prefix
pub const DEFAULT_AZURE_BASTION_SUBNET_CIDR: &str = "10.255.255.224/27";
/// Suffix of the default private DNS zone
pub const DEFAULT_PRIVATE_DNS_ZONE_SUFFIX: &str = "capz.io";

/// `<cluster>-vnet`
pub fn generate_vnet_name(cluster_name: &str) -> String {
    format!("{cluster_name}-vnet")
}

/// `<cluster>-controlplane-subnet`
pub fn generate_control_plane_subnet_name(cluster_name: &str) -> String {
    format!("{cluster_name}-controlplane-subnet")
}

/// `<cluster>-node-subnet`
pub fn generate_node_subnet_name(cluster_name: &str) -> String {
    format!("{cluster_name}-node-subnet")
}

/// `<cluster>-controlplane-nsg`
pub fn generate_control_plane_security_group_name(cluster_name: &str) -> String {
    format!("{cluster_name}-controlplane-nsg")
}

/// `<cluster>-node-nsg`
pub fn generate_node_security_group_name(cluster_name: &str) -> String {
    format!("{cluster_name}-node-nsg")
}

/// `<cluster>-node-routetable`
pub fn generate_node_route_table_name(cluster_name: &str) -> String {
    format!("{cluster_name}-node-routetable")
}

/// `<cluster>-internal-lb`
pub fn generate_internal_lb_name(cluster_name: &str) -> String {
    format!("{cluster_name}-internal-lb")
}

/// `<cluster>-public-lb`
pub fn generate_public_lb_name(cluster_name: &str) -> String {
    format!("{cluster_name}-public-lb")
}

/// `<cluster>-outbound-lb`
pub fn generate_control_plane_outbound_lb_name(cluster_name: &str) -> String {
    format!("{cluster_name}-outbound-lb")
}

/// `<lb>-frontEnd`
pub fn generate_frontend_ip_config_name(lb_name: &str) -> String {
    format!("{lb_name}-frontEnd")
}

/// `<lb>-backendPool`
pub fn generate_backend_address_pool_name(lb_name: &str) -> String {
    format!("{lb_name}-backendPool")
}

/// `<lb>-outboundBackendPool`
pub fn generate_outbound_backend_address_pool_name(lb_name: &str) -> String {
    format!("{lb_name}-outboundBackendPool")
}

/// `pip-<cluster>-apiserver`
pub fn generate_public_ip_name(cluster_name: &str) -> String {
    format!("pip-{cluster_name}-apiserver")
}

/// `pip-<cluster>-node-outbound`
pub fn generate_node_outbound_ip_name(cluster_name: &str) -> String {
    format!("pip-{cluster_name}-node-outbound")
}

/// `pip-<cluster>-controlplane-outbound`
pub fn generate_control_plane_outbound_ip_name(cluster_name: &str) -> String {
    format!("pip-{cluster_name}-controlplane-outbound")
}

/// `pip-<cluster>-<subnet>-natgw`
pub fn generate_nat_gateway_ip_name(cluster_name: &str, subnet_name: &str) -> String {
    format!("pip-{cluster_name}-{subnet_name}-natgw")
}

/// `<cluster>-azure-bastion`
pub fn generate_azure_bastion_name(cluster_name: &str) -> String {
    format!("{cluster_name}-azure-bastion")
}

/// `<cluster>-bastionIP`
pub fn generate_azure_bastion_public_ip_name(cluster_name: &str) -> String {
    format!("{cluster_name}-bastionIP")
}

/// `<cluster>.capz.io`
pub fn generate_private_dns_zone_name(cluster_name: &str) -> String {
    format!("{cluster_name}.{DEFAULT_PRIVATE_DNS_ZONE_SUFFIX}")
}

/// Append `-<i+1>` when more than one item is generated
pub fn with_index(name: &str, index: usize, count: usize) -> String {
    if count > 1 {
        format!("{name}-{}", index + 1)
    } else {
        name.to_string()
    }
}

/// Frontends of an outbound load balancer generated from its frontend count
pub fn generate_outbound_frontends(lb_name: &str, ip_name: &str, count: usize) -> Vec<FrontendIp> {
    (0..count)
        .map(|i| FrontendIp {
            name: with_index(&generate_frontend_ip_config_name(lb_name), i, count),
            public_ip: Some(PublicIpSpec {
                name: with_index(ip_name, i, count),
                ..Default::default()
            }),
            private_ip_address: None,
        })
        .collect()
}

impl AzureCluster {
    /// Apply defaults for a cluster named `cluster_name`
    pub fn set_defaults(&mut self, cluster_name: &str) {
        if self.spec.resource_group.is_empty() {
            self.spec.resource_group = cluster_name.to_string();
        }
        let resource_group = self.spec.resource_group.clone();
        let network = &mut self.spec.network_spec;

        set_vnet_defaults(network, cluster_name, &resource_group);
        set_subnet_defaults(network, cluster_name);
        set_api_server_lb_defaults(network, cluster_name);
        set_node_outbound_lb_defaults(network, cluster_name);
        set_control_plane_outbound_lb_defaults(network, cluster_name);

        if network.is_api_server_private() && network.private_dns_zone_name.is_none() {
            network.private_dns_zone_name = Some(generate_private_dns_zone_name(cluster_name));
        }

        if let Some(bastion) = self.spec.bastion_spec.azure_bastion.as_mut() {
            if bastion.name.is_empty() {
                bastion.name = generate_azure_bastion_name(cluster_name);
            }
            if bastion.subnet.name.is_empty() {
                bastion.subnet.name = DEFAULT_AZURE_BASTION_SUBNET_NAME.to_string();
            }
            bastion.subnet.role = SubnetRole::Bastion;
            if bastion.subnet.cidr_blocks.is_empty() {
                bastion.subnet.cidr_blocks = vec![DEFAULT_AZURE_BASTION_SUBNET_CIDR.to_string()];
            }
            if bastion.public_ip.name.is_empty() {
                bastion.public_ip.name = generate_azure_bastion_public_ip_name(cluster_name);
            }
        }
    }
}

fn set_vnet_defaults(network: &mut NetworkSpec, cluster_name: &str, resource_group: &str) {
    let vnet = &mut network.vnet;
    if vnet.resource_group.is_empty() {
        vnet.resource_group = resource_group.to_string();
    }
    if vnet.name.is_empty() {
        vnet.name = generate_vnet_name(cluster_name);
    }
    if vnet.id.is_empty() && vnet.cidr_blocks.is_empty() {
        vnet.cidr_blocks = vec![DEFAULT_VNET_CIDR.to_string()];
    }
    for peering in &mut vnet.peerings {
        if peering.resource_group.is_empty() {
            peering.resource_group = vnet.resource_group.clone();
        }
    }
}

fn set_subnet_defaults(network: &mut NetworkSpec, cluster_name: &str) {
    if network.control_plane_subnet().is_none() {
        network.subnets.push(SubnetSpec {
            role: SubnetRole::ControlPlane,
            ..Default::default()
        });
    }
    if network.node_subnets().next().is_none() {
        network.subnets.push(SubnetSpec {
            role: SubnetRole::Node,
            ..Default::default()
        });
    }

    for subnet in &mut network.subnets {
        match subnet.role {
            SubnetRole::ControlPlane => {
                if subnet.name.is_empty() {
                    subnet.name = generate_control_plane_subnet_name(cluster_name);
                }
                if subnet.cidr_blocks.is_empty() {
                    subnet.cidr_blocks = vec![DEFAULT_CONTROL_PLANE_SUBNET_CIDR.to_string()];
                }
                if subnet.security_group.name.is_empty() {
                    subnet.security_group.name = generate_control_plane_security_group_name(cluster_name);
                }
            }
            SubnetRole::Node => {
                if subnet.name.is_empty() {
                    subnet.name = generate_node_subnet_name(cluster_name);
                }
                if subnet.cidr_blocks.is_empty() {
                    subnet.cidr_blocks = vec![DEFAULT_NODE_SUBNET_CIDR.to_string()];
                }
                if subnet.security_group.name.is_empty() {
                    subnet.security_group.name = generate_node_security_group_name(cluster_name);
                }
                if subnet.route_table.name.is_empty() {
                    subnet.route_table.name = generate_node_route_table_name(cluster_name);
                }
                if subnet.is_nat_gateway_enabled() && subnet.nat_gateway.nat_gateway_ip.name.is_empty() {
                    subnet.nat_gateway.nat_gateway_ip.name = generate_nat_gateway_ip_name(cluster_name, &subnet.name);
                }
            }
            SubnetRole::Bastion => {}
        }
    }
}

fn set_api_server_lb_defaults(network: &mut NetworkSpec, cluster_name: &str) {
    let lb = &mut network.api_server_lb;
    if lb.name.is_empty() {
        lb.name = match lb.type_ {
            LoadBalancerType::Public => generate_public_lb_name(cluster_name),
            LoadBalancerType::Internal => generate_internal_lb_name(cluster_name),
        };
    }
    if lb.frontend_ips.is_empty() {
        let frontend = match lb.type_ {
            LoadBalancerType::Public => FrontendIp {
                name: generate_frontend_ip_config_name(&lb.name),
                public_ip: Some(PublicIpSpec {
                    name: generate_public_ip_name(cluster_name),
                    ..Default::default()
                }),
                private_ip_address: None,
            },
            LoadBalancerType::Internal => FrontendIp {
                name: generate_frontend_ip_config_name(&lb.name),
                public_ip: None,
                private_ip_address: Some(DEFAULT_INTERNAL_LB_IP_ADDRESS.to_string()),
            },
        };
        lb.frontend_ips.push(frontend);
    }
    if lb.backend_pool.name.is_empty() {
        lb.backend_pool = BackendPool {
            name: generate_backend_address_pool_name(&lb.name),
        };
    }
    set_lb_common_defaults(lb);
}

fn set_node_outbound_lb_defaults(network: &mut NetworkSpec, cluster_name: &str) {
    // Public clusters without NAT gateways need an outbound path for nodes.
    if network.node_outbound_lb.is_none()
        && !network.is_api_server_private()
        && !network.node_subnets().any(SubnetSpec::is_nat_gateway_enabled)
    {
        network.node_outbound_lb = Some(LoadBalancerSpec::default());
    }
    if let Some(lb) = network.node_outbound_lb.as_mut() {
        if lb.name.is_empty() {
            lb.name = cluster_name.to_string();
        }
        set_outbound_lb_defaults(lb, &generate_node_outbound_ip_name(cluster_name));
    }
}

fn set_control_plane_outbound_lb_defaults(network: &mut NetworkSpec, cluster_name: &str) {
    if let Some(lb) = network.control_plane_outbound_lb.as_mut() {
        if lb.name.is_empty() {
            lb.name = generate_control_plane_outbound_lb_name(cluster_name);
        }
        set_outbound_lb_defaults(lb, &generate_control_plane_outbound_ip_name(cluster_name));
    }
}

fn set_outbound_lb_defaults(lb: &mut LoadBalancerSpec, ip_name: &str) {
    lb.type_ = LoadBalancerType::Public;
    let count = *lb.frontend_ips_count.get_or_insert(1);
    let count = usize::try_from(count).unwrap_or(0);
    if lb.frontend_ips.len() != count {
        lb.frontend_ips = generate_outbound_frontends(&lb.name, ip_name, count);
    }
    if lb.backend_pool.name.is_empty() {
        lb.backend_pool = BackendPool {
            name: generate_outbound_backend_address_pool_name(&lb.name),
        };
    }
    set_lb_common_defaults(lb);
}

fn set_lb_common_defaults(lb: &mut LoadBalancerSpec) {
    lb.sku = LoadBalancerSku::Standard;
    if lb.idle_timeout_in_minutes.is_none() {
        lb.idle_timeout_in_minutes = Some(DEFAULT_OUTBOUND_LB_IDLE_TIMEOUT_IN_MINUTES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure_cluster::AzureClusterSpec;
    use crate::network::{AzureBastion, NatGateway};

    fn cluster() -> AzureCluster {
        AzureCluster::new(
            "my-cluster",
            AzureClusterSpec {
                location: "westus2".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_defaults_public_cluster() {
        let mut c = cluster();
        c.set_defaults("my-cluster");
        let net = &c.spec.network_spec;

        assert_eq!(c.spec.resource_group, "my-cluster");
        assert_eq!(net.vnet.name, "my-cluster-vnet");
        assert_eq!(net.vnet.cidr_blocks, vec!["10.0.0.0/8"]);

        let cp = net.control_plane_subnet().unwrap();
        assert_eq!(cp.name, "my-cluster-controlplane-subnet");
        assert_eq!(cp.security_group.name, "my-cluster-controlplane-nsg");

        let node = net.node_subnets().next().unwrap();
        assert_eq!(node.name, "my-cluster-node-subnet");
        assert_eq!(node.route_table.name, "my-cluster-node-routetable");

        assert_eq!(net.api_server_lb.name, "my-cluster-public-lb");
        assert_eq!(net.api_server_lb.frontend_ips[0].name, "my-cluster-public-lb-frontEnd");
        assert_eq!(
            net.api_server_lb.frontend_ips[0].public_ip.as_ref().map(|p| p.name.as_str()),
            Some("pip-my-cluster-apiserver")
        );
        assert_eq!(net.api_server_lb.backend_pool.name, "my-cluster-public-lb-backendPool");

        let outbound = net.node_outbound_lb.as_ref().unwrap();
        assert_eq!(outbound.name, "my-cluster");
        assert_eq!(outbound.frontend_ips_count, Some(1));
        assert_eq!(
            outbound.frontend_ips[0].public_ip.as_ref().map(|p| p.name.as_str()),
            Some("pip-my-cluster-node-outbound")
        );
        assert_eq!(outbound.backend_pool.name, "my-cluster-outboundBackendPool");
        assert!(net.private_dns_zone_name.is_none());
    }

    #[test]
    fn test_defaults_private_cluster_with_outbound_count() {
        let mut c = cluster();
        c.spec.network_spec.api_server_lb.type_ = LoadBalancerType::Internal;
        c.spec.network_spec.control_plane_outbound_lb = Some(LoadBalancerSpec {
            frontend_ips_count: Some(2),
            ..Default::default()
        });
        c.set_defaults("my-cluster");
        let net = &c.spec.network_spec;

        assert_eq!(net.api_server_lb.name, "my-cluster-internal-lb");
        assert_eq!(
            net.api_server_lb.frontend_ips[0].private_ip_address.as_deref(),
            Some("10.0.0.100")
        );
        assert!(net.node_outbound_lb.is_none());
        assert_eq!(net.private_dns_zone_name.as_deref(), Some("my-cluster.capz.io"));

        let cp_outbound = net.control_plane_outbound_lb.as_ref().unwrap();
        let names: Vec<_> = cp_outbound
            .frontend_ips
            .iter()
            .filter_map(|f| f.public_ip.as_ref().map(|p| p.name.clone()))
            .collect();
        assert_eq!(
            names,
            vec!["pip-my-cluster-controlplane-outbound-1", "pip-my-cluster-controlplane-outbound-2"]
        );
    }

    #[test]
    fn test_defaults_nat_gateway_and_bastion() {
        let mut c = cluster();
        c.spec.network_spec.subnets = vec![SubnetSpec {
            role: SubnetRole::Node,
            name: "workers".to_string(),
            nat_gateway: NatGateway {
                name: "workers-natgw".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }];
        c.spec.bastion_spec.azure_bastion = Some(AzureBastion::default());
        c.set_defaults("my-cluster");

        let node = c.spec.network_spec.subnet("workers").unwrap();
        assert_eq!(node.nat_gateway.nat_gateway_ip.name, "pip-my-cluster-workers-natgw");
        assert!(c.spec.network_spec.node_outbound_lb.is_none());

        let bastion = c.spec.bastion_spec.azure_bastion.as_ref().unwrap();
        assert_eq!(bastion.name, "my-cluster-azure-bastion");
        assert_eq!(bastion.subnet.name, "AzureBastionSubnet");
        assert_eq!(bastion.public_ip.name, "my-cluster-bastionIP");
    }

    #[test]
    fn test_defaults_are_idempotent() {
        let mut c = cluster();
        c.set_defaults("my-cluster");
        let once = c.spec.network_spec.clone();
        c.set_defaults("my-cluster");
        assert_eq!(once, c.spec.network_spec);
    }
}
