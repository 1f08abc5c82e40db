//! Configuration handling for totp-vpn

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const LOCAL_CONFIG: &str = "totp-vpn.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Show desktop notifications for connect/disconnect results
    pub notifications: bool,
    pub client: ClientConfig,
    pub tunnel: TunnelConfig,
    pub timing: TimingConfig,
    pub catalog: CatalogConfig,
}

/// How the external VPN client is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub binary: String,
    /// Privilege-elevation wrapper, e.g. `["pkexec"]` or `["sudo", "-n"]`.
    /// Empty runs the client unprivileged.
    pub elevation: Vec<String>,
    /// Appended after `--auth-user-pass <file>`
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Interface whose presence means the tunnel is up
    pub interface: String,
    /// Where the client records its pid (`--writepid`)
    pub pid_file: PathBuf,
    /// Directory for staged credential files; system temp dir when unset
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub connect_settle_secs: u64,
    pub disconnect_settle_secs: u64,
    pub settle_probe_ms: u64,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            notifications: true,
            client: ClientConfig::default(),
            tunnel: TunnelConfig::default(),
            timing: TimingConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            binary: "openvpn".to_string(),
            elevation: vec!["pkexec".to_string()],
            extra_args: Vec::new(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            interface: "tun0".to_string(),
            pid_file: std::env::temp_dir().join("vpn_manager.pid"),
            staging_dir: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_settle_secs: 10,
            disconnect_settle_secs: 5,
            settle_probe_ms: 500,
            poll_interval_secs: 5,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: base.join("totp-vpn").join("profiles.json"),
        }
    }
}

impl TimingConfig {
    pub fn connect_settle(&self) -> Duration {
        Duration::from_secs(self.connect_settle_secs)
    }

    pub fn disconnect_settle(&self) -> Duration {
        Duration::from_secs(self.disconnect_settle_secs)
    }

    pub fn settle_probe(&self) -> Duration {
        Duration::from_millis(self.settle_probe_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
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

    /// Per-user config location (`~/.config/totp-vpn/config.toml` on Linux)
    pub fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("totp-vpn").join("config.toml"))
    }

    /// Load config from an explicit path, or from the default locations
    ///
    /// Search order: `./totp-vpn.toml`, then the per-user config file,
    /// then built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Self::load(&local);
        }

        if let Some(user) = Self::user_path().filter(|p| p.exists()) {
            return Self::load(&user);
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }
}
