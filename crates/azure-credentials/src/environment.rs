//! Azure cloud environments
//!
//! Sovereign clouds differ in their Resource Manager, Active Directory and
//! VM DNS endpoints. Names are matched case-insensitively, the way the Azure
//! SDKs accept them in `AZURE_ENVIRONMENT`.

use std::fmt;

use crate::error::CredentialsError;

/// Name of the public cloud, used when no environment is configured
pub const PUBLIC_CLOUD_NAME: &str = "AzurePublicCloud";

/// A known Azure cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloudEnvironment {
    /// Azure public cloud
    #[default]
    Public,
    /// Azure US Government
    UsGovernment,
    /// Azure China (21Vianet)
    China,
    /// Azure Germany
    German,
}

impl CloudEnvironment {
    /// Look up an environment by name; an empty name selects the public cloud
    pub fn from_name(name: &str) -> Result<Self, CredentialsError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(CloudEnvironment::Public);
        }
        match name.to_ascii_uppercase().as_str() {
            "AZUREPUBLICCLOUD" => Ok(CloudEnvironment::Public),
            "AZUREUSGOVERNMENTCLOUD" => Ok(CloudEnvironment::UsGovernment),
            "AZURECHINACLOUD" => Ok(CloudEnvironment::China),
            "AZUREGERMANCLOUD" => Ok(CloudEnvironment::German),
            _ => Err(CredentialsError::EnvironmentNotFound(name.to_string())),
        }
    }

    /// Canonical environment name
    pub fn name(&self) -> &'static str {
        match self {
            CloudEnvironment::Public => PUBLIC_CLOUD_NAME,
            CloudEnvironment::UsGovernment => "AzureUSGovernmentCloud",
            CloudEnvironment::China => "AzureChinaCloud",
            CloudEnvironment::German => "AzureGermanCloud",
        }
    }

    /// Azure Resource Manager endpoint
    pub fn resource_manager_endpoint(&self) -> &'static str {
        match self {
            CloudEnvironment::Public => "https://management.azure.com/",
            CloudEnvironment::UsGovernment => "https://management.usgovcloudapi.net/",
            CloudEnvironment::China => "https://management.chinacloudapi.cn/",
            CloudEnvironment::German => "https://management.microsoftazure.de/",
        }
    }

    /// Azure Active Directory authority host
    pub fn active_directory_endpoint(&self) -> &'static str {
        match self {
            CloudEnvironment::Public => "https://login.microsoftonline.com/",
            CloudEnvironment::UsGovernment => "https://login.microsoftonline.us/",
            CloudEnvironment::China => "https://login.chinacloudapi.cn/",
            CloudEnvironment::German => "https://login.microsoftonline.de/",
        }
    }

    /// DNS suffix of public IP FQDNs in this cloud
    pub fn vm_dns_suffix(&self) -> &'static str {
        match self {
            CloudEnvironment::Public => "cloudapp.azure.com",
            CloudEnvironment::UsGovernment => "cloudapp.usgovcloudapi.net",
            CloudEnvironment::China => "cloudapp.chinacloudapi.cn",
            CloudEnvironment::German => "cloudapp.microsoftazure.de",
        }
    }
}

impl fmt::Display for CloudEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
