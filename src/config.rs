//! Configuration loading and types for Qave.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Every field has a default, so an empty file (or
//! no file at all) yields a runnable configuration.

use garde::Validate;
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    #[garde(skip)]
    pub server: ServerConfig,

    /// Metadata store settings.
    #[serde(default)]
    #[garde(skip)]
    pub metadata: MetadataConfig,

    /// Piece storage backend settings.
    #[serde(default)]
    #[garde(skip)]
    pub storage: StorageConfig,

    /// Lease issuance settings.
    #[serde(default)]
    #[garde(dive)]
    pub lease: LeaseConfig,

    /// Expiration sweeper settings.
    #[serde(default)]
    #[garde(dive)]
    pub sweeper: SweeperConfig,

    /// Logging settings.
    #[serde(default)]
    #[garde(skip)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    #[garde(skip)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Reject settings that would make the service misbehave.
    pub fn check(&self) -> anyhow::Result<()> {
        self.validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum upload size in bytes (default 50 MiB).
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `sqlite` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Piece storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `mock` or `local`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored pieces.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Lease issuance configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LeaseConfig {
    /// Lifetime of every new lease, in days.
    #[serde(default = "default_lease_days")]
    #[garde(range(min = 1))]
    pub duration_days: u32,
}

impl LeaseConfig {
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.duration_days))
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_days: default_lease_days(),
        }
    }
}

/// Expiration sweeper configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SweeperConfig {
    /// Whether the background sweeper runs at all.
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub enabled: bool,

    /// Seconds between sweep cycles. Zero would busy-loop.
    #[serde(default = "default_sweep_interval")]
    #[garde(range(min = 1))]
    pub interval_seconds: u64,
}

impl SweeperConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds)
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_sweep_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_upload_size() -> u64 {
    50 * 1024 * 1024
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/meta.db".to_string()
}

fn default_storage_backend() -> String {
    "mock".to_string()
}

fn default_storage_root() -> String {
    "./data/pieces".to_string()
}

fn default_lease_days() -> u32 {
    30
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load, parse and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    // An empty document deserializes to unit, not an empty mapping.
    let config: Config = if contents.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    config.check()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.max_upload_size, 52_428_800);
        assert_eq!(config.metadata.engine, "sqlite");
        assert_eq!(config.metadata.sqlite.path, "./data/meta.db");
        assert_eq!(config.storage.backend, "mock");
        assert_eq!(config.lease.duration_days, 30);
        assert_eq!(config.lease.duration(), chrono::Duration::days(30));
        assert!(config.sweeper.enabled);
        assert_eq!(config.sweeper.interval(), std::time::Duration::from_secs(5));
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
server:
  port: 9999
metadata:
  engine: memory
storage:
  backend: local
  local:
    root_dir: /tmp/pieces
sweeper:
  interval_seconds: 60
logging:
  format: json
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.metadata.engine, "memory");
        assert_eq!(config.storage.local.root_dir, "/tmp/pieces");
        assert_eq!(config.sweeper.interval_seconds, 60);
        assert!(config.sweeper.enabled);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(parse_config("sweeper:\n  interval_seconds: 0\n").is_err());
    }

    #[test]
    fn test_zero_lease_duration_rejected() {
        assert!(parse_config("lease:\n  duration_days: 0\n").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qave.yaml");
        std::fs::write(&path, "lease:\n  duration_days: 7\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.lease.duration_days, 7);
    }
}
