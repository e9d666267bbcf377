//! Configuration handling for the kill switch

use crate::controller::KillSwitchMode;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = "nm-killswitch.toml";
const SYSTEM_CONFIG_PATH: &str = "/etc/nm-killswitch.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub killswitch: KillSwitchConfig,
    pub backend: BackendConfig,
    pub openconnect: OpenConnectConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KillSwitchConfig {
    pub mode: KillSwitchMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// nmcli executable, used to create and delete connections
    pub nmcli: String,
    /// Held exclusively for the duration of every action
    pub lock_file: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            nmcli: "nmcli".to_string(),
            lock_file: PathBuf::from("/run/nm-killswitch.lock"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpenConnectConfig {
    /// VPN server to allow when OpenConnect has not resolved VPNGATEWAY yet
    pub server: Option<IpAddr>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Candidate config locations, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("nm-killswitch").join("config.toml"));
        }
        paths.push(PathBuf::from(SYSTEM_CONFIG_PATH));
        paths
    }

    /// Load the first config found, or defaults.
    ///
    /// Returns the path the config came from (or should be saved to).
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, PathBuf), ConfigError> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok((Self::load(path)?, path.to_path_buf()));
            }
            info!("Config {} not found, using defaults", path.display());
            return Ok((Self::default(), path.to_path_buf()));
        }

        let paths = Self::search_paths();
        for path in &paths {
            if path.exists() {
                debug!("Loading config from {}", path.display());
                return Ok((Self::load(path)?, path.clone()));
            }
        }

        info!("No config file found, using defaults");
        let fallback = paths
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH));
        Ok((Self::default(), fallback))
    }
}
