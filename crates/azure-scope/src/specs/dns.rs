//! Private DNS specs for internal API servers

use crds::tags::Tags;

use super::ResourceSpecGetter;

/// Host name of the API server record inside the private zone
pub const PRIVATE_API_SERVER_HOSTNAME: &str = "apiserver";

/// Private DNS zone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateDnsZoneSpec {
    pub name: String,
    pub resource_group: String,
    pub cluster_name: String,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for PrivateDnsZoneSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }
}

/// Link between the zone and one VNet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateDnsLinkSpec {
    /// `<vnet>-link`
    pub link_name: String,
    pub zone_name: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub vnet_name: String,
    pub vnet_resource_group: String,
    pub cluster_name: String,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for PrivateDnsLinkSpec {
    fn resource_name(&self) -> &str {
        &self.link_name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn owner_resource_name(&self) -> &str {
        &self.zone_name
    }
}

/// A record inside the zone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateDnsRecordSpec {
    pub hostname: String,
    pub ip: String,
    pub zone_name: String,
    pub resource_group: String,
}

impl ResourceSpecGetter for PrivateDnsRecordSpec {
    fn resource_name(&self) -> &str {
        &self.hostname
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn owner_resource_name(&self) -> &str {
        &self.zone_name
    }
}

/// Zone, links and records reconciled together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateDnsSpec {
    pub zone: PrivateDnsZoneSpec,
    /// Local VNet first, then one per peered VNet
    pub links: Vec<PrivateDnsLinkSpec>,
    pub records: Vec<PrivateDnsRecordSpec>,
}
