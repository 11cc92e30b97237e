//! Configuration management for guardctl

use crate::model::validate_cidr;
use crate::retry::RetryPolicy;
use crate::tags::{TagScheme, DEFAULT_MARKER};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current config version for migration support
pub const CONFIG_VERSION: u32 = 1;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "GUARDCTL_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    pub version: u32,
    pub cloud: CloudSection,
    pub network: NetworkSection,
    pub machine: MachineSection,
    pub wireguard: WireGuardSection,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub discovery: DiscoverySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudSection {
    /// Subscription to operate in; `None` uses the CLI's active one
    pub subscription: Option<String>,
    pub default_location: String,
    /// Value of the `managed-by` tag; scopes every discovery scan
    pub management_marker: String,
    /// Path or name of the Azure CLI binary
    pub az_binary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSection {
    /// Address space of each guard's private network
    pub network_cidr: String,
    /// Guard subnet, inside `network_cidr`
    pub subnet_cidr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSection {
    pub size: String,
    pub image: String,
    pub admin_username: String,
    /// Public key installed for the admin user; generated by the CLI if unset
    pub ssh_public_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireGuardSection {
    /// Listen port used when the WireGuard config doesn't specify one
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Guards reconstructed in parallel during a list
    pub concurrency: usize,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            cloud: CloudSection {
                subscription: None,
                default_location: "westeurope".to_string(),
                management_marker: DEFAULT_MARKER.to_string(),
                az_binary: "az".to_string(),
            },
            network: NetworkSection {
                network_cidr: "10.250.0.0/24".to_string(),
                subnet_cidr: "10.250.0.0/26".to_string(),
            },
            machine: MachineSection {
                size: "Standard_B1s".to_string(),
                image: "Canonical:ubuntu-24_04-lts:server:latest".to_string(),
                admin_username: "guard".to_string(),
                ssh_public_key: None,
            },
            wireguard: WireGuardSection { port: 51820 },
            retry: RetryPolicy::default(),
            discovery: DiscoverySection::default(),
        }
    }
}

impl GuardConfig {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("guardctl")
            .join("config.toml")
    }

    /// Load config from `path`, writing defaults there first if it is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Load config from a specific path
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;

        if config.version > CONFIG_VERSION {
            return Err(Error::config(format!(
                "{} was written by a newer guardctl (version {}, supported {})",
                path.display(),
                config.version,
                CONFIG_VERSION
            )));
        }

        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cloud.management_marker.trim().is_empty() {
            return Err(Error::validation("cloud.management_marker cannot be empty"));
        }
        if self.cloud.default_location.trim().is_empty() {
            return Err(Error::validation("cloud.default_location cannot be empty"));
        }
        let network = validate_cidr(&self.network.network_cidr)?;
        let subnet = validate_cidr(&self.network.subnet_cidr)?;
        if !network.contains(&subnet) {
            return Err(Error::validation(format!(
                "network.subnet_cidr {} is not inside network.network_cidr {}",
                subnet, network
            )));
        }
        if self.machine.size.is_empty() || self.machine.image.is_empty() {
            return Err(Error::validation("machine.size and machine.image are required"));
        }
        if self.wireguard.port == 0 {
            return Err(Error::validation("wireguard.port must be greater than 0"));
        }
        if self.discovery.concurrency == 0 {
            return Err(Error::validation("discovery.concurrency must be at least 1"));
        }
        self.retry.validate()
    }

    pub fn tag_scheme(&self) -> TagScheme {
        TagScheme::new(self.cloud.management_marker.clone())
    }
}
