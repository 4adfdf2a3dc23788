//! Virtual machine scale set spec

use crds::azure_machine_pool::{DataDisk, OrchestrationMode, OsDisk, SpotVmOptions};
use crds::tags::Tags;

use super::ResourceSpecGetter;

/// Service name of scale set futures
pub const SCALE_SETS_SERVICE_NAME: &str = "scalesets";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleSetSpec {
    /// Pool name, shortened for Windows pools
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub cluster_name: String,
    pub size: String,
    pub capacity: i64,
    pub ssh_key_data: String,
    pub os_disk: OsDisk,
    pub data_disks: Vec<DataDisk>,
    pub subnet_name: String,
    pub vnet_name: String,
    pub vnet_resource_group: String,
    pub accelerated_networking: Option<bool>,
    pub terminate_notification_timeout: Option<i32>,
    pub spot_vm_options: Option<SpotVmOptions>,
    pub failure_domains: Vec<String>,
    pub orchestration_mode: OrchestrationMode,
    pub additional_tags: Tags,
}

impl ResourceSpecGetter for ScaleSetSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }
}
