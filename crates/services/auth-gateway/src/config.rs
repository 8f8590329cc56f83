//! Configuration for the auth gateway
//!
//! Configuration is loaded from a TOML file or a directory of TOML files,
//! then overridden by environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::access::{AllowList, InvalidCidr};

/// Main configuration for the auth gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client allow-lists and token extraction
    #[serde(default)]
    pub access: AccessConfig,

    /// MediaMTX control API
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Grant database and cache timings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Forward-auth endpoint for the thumbnail server
    #[serde(default)]
    pub forward_auth: ForwardAuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Client allow-lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Clients allowed to use the `api`, `metrics` and `pprof` actions
    #[serde(default = "default_api_ip_ranges")]
    pub api_ip_ranges: Vec<String>,

    /// Clients allowed everything without a token (container networks)
    #[serde(default = "default_private_ip_ranges")]
    pub private_ip_ranges: Vec<String>,

    /// Query string parameter carrying the token
    #[serde(default = "default_query_token_key")]
    pub query_token_key: String,
}

fn default_api_ip_ranges() -> Vec<String> {
    vec!["127.0.0.0/8".to_string(), "::1/128".to_string()]
}

fn default_private_ip_ranges() -> Vec<String> {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "198.18.0.0/15",
        "::1/128",
        "fc00::/7",
        "fe80::/64",
    ]
    .iter()
    .map(|cidr| cidr.to_string())
    .collect()
}

fn default_query_token_key() -> String {
    "token".to_string()
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            api_ip_ranges: default_api_ip_ranges(),
            private_ip_ranges: default_private_ip_ranges(),
            query_token_key: default_query_token_key(),
        }
    }
}

impl AccessConfig {
    pub fn api_allow_list(&self) -> Result<AllowList, ConfigError> {
        Ok(AllowList::parse(&self.api_ip_ranges)?)
    }

    pub fn private_allow_list(&self) -> Result<AllowList, ConfigError> {
        Ok(AllowList::parse(&self.private_ip_ranges)?)
    }
}

/// MediaMTX control API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// API base for read and playback sessions
    #[serde(default = "default_api_base")]
    pub primary_url: String,

    /// API base for publishing sessions
    #[serde(default = "default_api_base")]
    pub publish_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_control_timeout")]
    pub timeout_seconds: u64,
}

fn default_api_base() -> String {
    "http://localhost:9997".to_string()
}

fn default_control_timeout() -> u64 {
    5
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            primary_url: default_api_base(),
            publish_url: default_api_base(),
            timeout_seconds: default_control_timeout(),
        }
    }
}

impl ControlPlaneConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Grant database and cache timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Per-query timeout in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,

    /// Interval between grant scans in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Lifetime of a cached decision in seconds
    #[serde(default = "default_cache_duration")]
    pub cache_duration_seconds: u64,

    /// Interval between liveness checks of a tracked session, in minutes
    #[serde(default = "default_connection_track")]
    pub connection_track_minutes: u64,

    /// Expiry sweep interval in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_millis: u64,
}

fn default_db_path() -> String {
    "auth.db".to_string()
}

fn default_query_timeout() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    15
}

fn default_cache_duration() -> u64 {
    300 // 5 minutes
}

fn default_connection_track() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    1000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            query_timeout_seconds: default_query_timeout(),
            poll_interval_seconds: default_poll_interval(),
            cache_duration_seconds: default_cache_duration(),
            connection_track_minutes: default_connection_track(),
            sweep_interval_millis: default_sweep_interval(),
        }
    }
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_duration_seconds)
    }

    pub fn connection_track(&self) -> Duration {
        Duration::from_secs(self.connection_track_minutes.saturating_mul(60))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_millis)
    }

    /// Reject zero intervals and lifetimes
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("database.poll_interval_seconds", self.poll_interval_seconds),
            ("database.cache_duration_seconds", self.cache_duration_seconds),
            ("database.connection_track_minutes", self.connection_track_minutes),
            ("database.sweep_interval_millis", self.sweep_interval_millis),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Invalid(format!("{name} must be greater than zero"))),
            None => Ok(()),
        }
    }
}

/// Forward-auth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardAuthConfig {
    /// Header carrying the original request URI
    #[serde(default = "default_uri_header")]
    pub uri_header: String,

    /// Header carrying the client address chain
    #[serde(default = "default_ip_header")]
    pub ip_header: String,

    /// URI prefix served by the thumbnail server
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

fn default_uri_header() -> String {
    "X-Forwarded-Uri".to_string()
}

fn default_ip_header() -> String {
    "X-Forwarded-For".to_string()
}

fn default_base_path() -> String {
    "/thumbnails".to_string()
}

impl Default for ForwardAuthConfig {
    fn default() -> Self {
        Self {
            uri_header: default_uri_header(),
            ip_header: default_ip_header(),
            base_path: default_base_path(),
        }
    }
}

impl Config {
    /// Load configuration from a single TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Deep-merge every `*.toml` file in a directory, in file name order
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, ConfigError> {
        let mut files: Vec<_> = std::fs::read_dir(dir.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"))
            })
            .collect();
        files.sort();

        let mut merged = toml::Table::new();
        for file in &files {
            let content =
                std::fs::read_to_string(file).map_err(|e| ConfigError::Io(e.to_string()))?;
            let table: toml::Table = toml::from_str(&content)
                .map_err(|e| ConfigError::Parse(format!("{}: {}", file.display(), e)))?;
            deep_merge(&mut merged, table);
        }

        toml::Value::Table(merged)
            .try_into::<Config>()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a file or directory, writing the default config first if
    /// nothing exists at `path`; environment overrides are applied last.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Creating default config");
            Self::default().write(path)?;
        }

        let mut config = if path.is_dir() {
            tracing::info!(path = %path.display(), "Loading config directory");
            Self::from_dir(path)?
        } else {
            tracing::info!(path = %path.display(), "Loading config");
            Self::from_file(path)?
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.database.validate()?;
        Ok(config)
    }

    /// Write this configuration as TOML
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Apply `BIND_ADDRESS`, `BIND_PORT`, `DB_PATH`, `MEDIAMTX_API_BASE` and
    /// `MEDIAMTX_API_BASE_PUBLISH`. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(host) = var("BIND_ADDRESS") {
            self.server.host = host;
        }
        if let Some(port) = var("BIND_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid BIND_PORT"),
            }
        }
        if let Some(path) = var("DB_PATH") {
            self.database.path = path;
        }
        if let Some(url) = var("MEDIAMTX_API_BASE") {
            self.control_plane.primary_url = url;
        }
        if let Some(url) = var("MEDIAMTX_API_BASE_PUBLISH") {
            self.control_plane.publish_url = url;
        }
    }
}

/// Merge `overlay` into `base`; nested tables merge, other values replace
fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Invalid value: {0}")]
    Invalid(String),

    #[error(transparent)]
    InvalidCidr(#[from] InvalidCidr),
}
