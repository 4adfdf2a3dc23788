//! Azure resource names, IDs and FQDNs

/// Prefix of Azure provider IDs on Kubernetes nodes
pub const PROVIDER_ID_PREFIX: &str = "azure://";

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash
pub fn fnv32a(data: &[u8]) -> u32 {
    data.iter().fold(FNV32_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV32_PRIME)
    })
}

/// Public IP DNS name: `<cluster>-<fnv32a(sub/rg/ip)>.<location>.<suffix>`, lowercased
pub fn generate_fqdn(
    cluster_name: &str,
    subscription_id: &str,
    resource_group: &str,
    ip_name: &str,
    location: &str,
    dns_suffix: &str,
) -> String {
    let hash = fnv32a(format!("{subscription_id}/{resource_group}/{ip_name}").as_bytes());
    format!("{cluster_name}-{hash:x}.{location}.{dns_suffix}").to_lowercase()
}

/// IP name and FQDN used by clusters created before the API server load balancer existed.
///
/// The hash covers the cluster name instead of the IP name.
#[deprecated(note = "only for clusters created without an API server load balancer; use generate_fqdn")]
pub fn generate_legacy_fqdn(
    cluster_name: &str,
    subscription_id: &str,
    resource_group: &str,
    location: &str,
    dns_suffix: &str,
) -> (String, String) {
    let hash = fnv32a(format!("{subscription_id}/{resource_group}/{cluster_name}").as_bytes());
    let ip_name = format!("{cluster_name}-{hash:x}");
    let fqdn = format!("{ip_name}.{location}.{dns_suffix}");
    (ip_name, fqdn)
}

/// `/subscriptions/<sub>/resourceGroups/<rg>`
pub fn resource_group_id(subscription_id: &str, resource_group: &str) -> String {
    format!("/subscriptions/{subscription_id}/resourceGroups/{resource_group}")
}

fn network_resource_id(subscription_id: &str, resource_group: &str, kind: &str, name: &str) -> String {
    format!(
        "{}/providers/Microsoft.Network/{kind}/{name}",
        resource_group_id(subscription_id, resource_group)
    )
}

/// Virtual network ID
pub fn vnet_id(subscription_id: &str, resource_group: &str, vnet_name: &str) -> String {
    network_resource_id(subscription_id, resource_group, "virtualNetworks", vnet_name)
}

/// Subnet ID
pub fn subnet_id(subscription_id: &str, resource_group: &str, vnet_name: &str, subnet_name: &str) -> String {
    format!("{}/subnets/{subnet_name}", vnet_id(subscription_id, resource_group, vnet_name))
}

/// Public IP ID
pub fn public_ip_id(subscription_id: &str, resource_group: &str, ip_name: &str) -> String {
    network_resource_id(subscription_id, resource_group, "publicIPAddresses", ip_name)
}

/// Network security group ID
pub fn security_group_id(subscription_id: &str, resource_group: &str, nsg_name: &str) -> String {
    network_resource_id(subscription_id, resource_group, "networkSecurityGroups", nsg_name)
}

/// Route table ID
pub fn route_table_id(subscription_id: &str, resource_group: &str, route_table_name: &str) -> String {
    network_resource_id(subscription_id, resource_group, "routeTables", route_table_name)
}

/// NAT gateway ID
pub fn nat_gateway_id(subscription_id: &str, resource_group: &str, nat_gateway_name: &str) -> String {
    network_resource_id(subscription_id, resource_group, "natGateways", nat_gateway_name)
}

/// Load balancer ID
pub fn load_balancer_id(subscription_id: &str, resource_group: &str, lb_name: &str) -> String {
    network_resource_id(subscription_id, resource_group, "loadBalancers", lb_name)
}

/// Scale set name; Windows computer name prefixes are limited to 9 characters
pub fn scale_set_name(pool_name: &str, os_type: &str) -> String {
    let chars: Vec<char> = pool_name.chars().collect();
    if os_type.eq_ignore_ascii_case("windows") && chars.len() > 9 {
        let tail: String = chars[chars.len() - 5..].iter().collect();
        return format!("win-{tail}");
    }
    pool_name.to_string()
}

/// Provider ID for an Azure resource ID
pub fn provider_id(resource_id: &str) -> String {
    format!("{PROVIDER_ID_PREFIX}{resource_id}")
}

/// Provider IDs compare case-insensitively (Azure resource IDs do)
pub fn provider_ids_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
