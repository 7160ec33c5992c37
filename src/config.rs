use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::address::Address;
use crate::network::NetworkPreferences;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse failed: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize failed: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Which VM the node should execute contracts with.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VmBackend {
    Interpreter,
    Jit,
    #[default]
    Smart,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConsoleConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub vm: VmBackend,
    pub node: NodeSection,
    pub accounts: AccountsSection,
    #[serde(default)]
    pub refresh: RefreshSection,
    #[serde(default)]
    pub rpc: RpcSection,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeSection {
    pub listen_ip: String,
    pub listen_port: u16,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default = "default_true")]
    pub upnp: bool,
    #[serde(default = "default_ideal_peers")]
    pub ideal_peers: u32,
    #[serde(default)]
    pub servers: Vec<String>,
    /// Hex-encoded blob persisted on behalf of the node
    #[serde(default)]
    pub network_config: String,
    #[serde(default)]
    pub private_chain: Option<String>,
    #[serde(default)]
    pub networking: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AccountsSection {
    #[serde(default)]
    pub beneficiary: Option<Address>,
    #[serde(default = "default_true")]
    pub require_confirmation: bool,
    #[serde(default)]
    pub skip_reprompt: bool,
    #[serde(default = "default_unlock_ttl")]
    pub unlock_ttl_secs: u64,
    #[serde(default = "default_vault_path")]
    pub vault_path: String,
    /// hex address -> display name
    #[serde(default)]
    pub naming_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RefreshSection {
    pub interval_ms: u64,
    /// Consecutive failed passes before the node is reported unreachable
    pub unavailable_threshold: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RpcSection {
    pub enabled: bool,
    pub port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ideal_peers() -> u32 {
    11
}

fn default_unlock_ttl() -> u64 {
    300
}

fn default_vault_path() -> String {
    "keys.json".to_string()
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self { interval_ms: 1000, unavailable_threshold: 5 }
    }
}

impl Default for RpcSection {
    fn default() -> Self {
        Self { enabled: true, port: 8545 }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            vm: VmBackend::default(),
            node: NodeSection {
                listen_ip: "0.0.0.0".to_string(),
                listen_port: 30303,
                public_ip: None,
                upnp: true,
                ideal_peers: default_ideal_peers(),
                servers: vec![],
                network_config: String::new(),
                private_chain: None,
                networking: false,
            },
            accounts: AccountsSection {
                beneficiary: None,
                require_confirmation: true,
                skip_reprompt: false,
                unlock_ttl_secs: default_unlock_ttl(),
                vault_path: default_vault_path(),
                naming_overrides: BTreeMap::new(),
            },
            refresh: RefreshSection::default(),
            rpc: RpcSection::default(),
        }
    }
}

impl ConsoleConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&s)?)
    }

    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load(path) {
                Ok(c) => {
                    info!("Config loaded from {}", path.display());
                    c
                }
                Err(e) => {
                    warn!("Error loading config: {}. Using defaults.", e);
                    Self::default()
                }
            }
        } else {
            info!("Config file not found at '{}'. Creating default.", path.display());
            let config = Self::default();
            if let Err(e) = config.save(path) {
                warn!("Could not write default config: {}", e);
            }
            config
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let s = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, s)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Network preferences derived from the persisted node section.
    pub fn net_prefs(&self) -> NetworkPreferences {
        let n = &self.node;
        NetworkPreferences {
            listen_ip: n.listen_ip.clone(),
            listen_port: n.listen_port,
            public_ip: n.public_ip.clone(),
            upnp: n.upnp,
            ideal_peers: n.ideal_peers,
            servers: n.servers.clone(),
            network_config: hex::decode(&n.network_config).unwrap_or_default(),
            private_chain: n.private_chain.clone().filter(|c| !c.is_empty()),
        }
    }

    /// Naming overrides with unparseable addresses dropped.
    pub fn parsed_naming_overrides(&self) -> BTreeMap<Address, String> {
        self.accounts
            .naming_overrides
            .iter()
            .filter_map(|(a, name)| match a.parse::<Address>() {
                Ok(addr) => Some((addr, name.clone())),
                Err(e) => {
                    warn!("Ignoring naming override '{}': {}", a, e);
                    None
                }
            })
            .collect()
    }
}
