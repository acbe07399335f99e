//! TOML configuration for a node.
//!
//! ```toml
//! [node]
//! name = "shelter-north"
//!
//! [network]
//! bind_address = "0.0.0.0"
//! listen_port = 3000
//! discovery_port = 4000
//!
//! [auth]
//! jwt_secret = "change-me"
//! token_lifetime_days = 30
//!
//! [discovery]
//! announce_interval_secs = 60
//!
//! [sync]
//! interval_secs = 300
//! initial_delay_secs = 10
//! request_timeout_secs = 5
//!
//! [storage]
//! database_path = "./database/survival.db"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every section and field is optional; `#[serde(default = "...")]` fills in
//! what the file leaves out, and a missing file means all defaults.
//! Command-line flags are layered on top by the binary.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is unusable.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// Label advertised to peers and stamped on locally registered users.
    #[serde(default = "default_node_name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Address both listeners bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// HTTP API port, shared with the WebSocket relay; also the port
    /// advertised in announces.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// UDP discovery port, shared by every node on the LAN.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSection {
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_sync_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSection {
    /// HMAC secret for account tokens.  Empty means a random secret per
    /// process, so tokens do not survive a restart.
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_token_lifetime_days")]
    pub token_lifetime_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_node_name() -> String {
    "UnnamedNode".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    3000
}
fn default_discovery_port() -> u16 {
    4000
}
fn default_announce_interval() -> u64 {
    60
}
fn default_sync_interval() -> u64 {
    300
}
fn default_sync_initial_delay() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    5
}
fn default_token_lifetime_days() -> u64 {
    30
}
fn default_database_path() -> PathBuf {
    PathBuf::from("./database/survival.db")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_node_name(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            listen_port: default_listen_port(),
            discovery_port: default_discovery_port(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            announce_interval_secs: default_announce_interval(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
            initial_delay_secs: default_sync_initial_delay(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_lifetime_days: default_token_lifetime_days(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl AppConfig {
    /// Rejects values that parse but cannot run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.name.trim().is_empty() {
            return Err(invalid("node.name", "must not be empty"));
        }
        self.bind_ip()?;
        let ports = [
            ("network.listen_port", self.network.listen_port),
            ("network.discovery_port", self.network.discovery_port),
        ];
        for (field, port) in ports {
            if port == 0 {
                return Err(invalid(field, "must be a fixed port, not 0"));
            }
        }
        let intervals = [
            ("discovery.announce_interval_secs", self.discovery.announce_interval_secs),
            ("sync.interval_secs", self.sync.interval_secs),
            ("sync.request_timeout_secs", self.sync.request_timeout_secs),
        ];
        for (field, secs) in intervals {
            if secs == 0 {
                return Err(invalid(field, "must be at least 1 second"));
            }
        }
        if self.auth.token_lifetime_days == 0 {
            return Err(invalid("auth.token_lifetime_days", "must be at least 1 day"));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `network.bind_address` is not an
    /// IP address.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.network
            .bind_address
            .trim()
            .parse()
            .map_err(|e| invalid("network.bind_address", format!("{e}")))
    }

    /// # Errors
    ///
    /// See [`AppConfig::bind_ip`].
    pub fn api_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.network.listen_port))
    }

    /// # Errors
    ///
    /// See [`AppConfig::bind_ip`].
    pub fn discovery_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.network.discovery_port))
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.announce_interval_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn sync_initial_delay(&self) -> Duration {
        Duration::from_secs(self.sync.initial_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.auth.token_lifetime_days.saturating_mul(24 * 60 * 60))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ── Config file access ────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
