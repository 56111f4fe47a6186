//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::CatalogConfig;
use crate::live::LiveConfig;
use crate::workers::PoolConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub catalog: CatalogSection,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub live: LiveSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Concurrent live WebSocket connections
    #[serde(default = "default_max_sockets")]
    pub max_sockets: usize,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_sockets() -> usize {
    128
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sockets: default_max_sockets(),
            cors_origins: Vec::new(),
        }
    }
}

/// Log directory watching
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSection {
    #[serde(default = "default_bag_dir")]
    pub bag_dir: String,

    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_ms: u64,

    /// Use file notifications; when false only the periodic rescan runs
    #[serde(default = "default_true")]
    pub watch: bool,
}

fn default_true() -> bool {
    true
}

fn default_bag_dir() -> String {
    "./bags".to_string()
}

fn default_debounce() -> u64 {
    100
}

fn default_rescan_interval() -> u64 {
    3000
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            bag_dir: default_bag_dir(),
            debounce_ms: default_debounce(),
            rescan_interval_ms: default_rescan_interval(),
            watch: true,
        }
    }
}

impl CatalogSection {
    pub fn catalog_config(&self) -> CatalogConfig {
        let mut config = CatalogConfig::new(&self.bag_dir);
        config.debounce = Duration::from_millis(self.debounce_ms.max(1));
        config.rescan_interval = Duration::from_millis(self.rescan_interval_ms.max(1));
        config.watch = self.watch;
        config
    }
}

/// Range query limits and worker pool
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_max_range_hours")]
    pub max_range_hours: u64,

    /// Worker threads; defaults to available parallelism minus one
    #[serde(default)]
    pub pool_size: Option<usize>,

    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_ms: u64,

    #[serde(default = "default_reader_cache_capacity")]
    pub reader_cache_capacity: usize,

    /// Lines buffered between a worker and the HTTP response
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_max_range_hours() -> u64 {
    24
}

fn default_worker_timeout() -> u64 {
    30_000
}

fn default_reader_cache_capacity() -> usize {
    crate::storage::DEFAULT_READER_CAPACITY
}

fn default_stream_buffer() -> usize {
    256
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_range_hours: default_max_range_hours(),
            pool_size: None,
            worker_timeout_ms: default_worker_timeout(),
            reader_cache_capacity: default_reader_cache_capacity(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl QueryConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            size: self
                .pool_size
                .filter(|n| *n > 0)
                .unwrap_or_else(PoolConfig::default_size),
            task_timeout: Duration::from_millis(self.worker_timeout_ms.max(1)),
            reader_cache_capacity: self.reader_cache_capacity.max(1),
            stream_buffer: self.stream_buffer.max(1),
            ..PoolConfig::default()
        }
    }

    /// Longest accepted query window in milliseconds
    pub fn max_range_ms(&self) -> i64 {
        i64::try_from(self.max_range_hours)
            .unwrap_or(i64::MAX)
            .saturating_mul(60 * 60 * 1000)
    }
}

/// Live streaming configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LiveSection {
    #[serde(default = "default_throttle_hz")]
    pub throttle_hz: u32,

    #[serde(default)]
    pub dds_domain: u32,

    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

fn default_throttle_hz() -> u32 {
    10
}

fn default_client_buffer() -> usize {
    64
}

impl Default for LiveSection {
    fn default() -> Self {
        Self {
            throttle_hz: default_throttle_hz(),
            dds_domain: 0,
            client_buffer: default_client_buffer(),
        }
    }
}

impl LiveSection {
    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            throttle_hz: self.throttle_hz.max(1),
            client_buffer: self.client_buffer.max(1),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("historian").join("config.toml")),
            Some(PathBuf::from("/etc/historian/config.toml")),
            Some(PathBuf::from("./historian.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup; unparseable numbers are ignored
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        // Server overrides
        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = parsed(var("PORT")) {
            self.server.port = port;
        }
        if let Some(max) = parsed(var("MAX_SOCKETS")) {
            self.server.max_sockets = max;
        }

        // Catalog overrides
        if let Some(dir) = var("BAG_DIR") {
            self.catalog.bag_dir = dir;
        }

        // Query overrides
        if let Some(hours) = parsed(var("MAX_RANGE_HOURS")) {
            self.query.max_range_hours = hours;
        }
        if let Some(size) = parsed(var("POOL_SIZE")) {
            self.query.pool_size = Some(size);
        }
        if let Some(timeout) = parsed(var("WORKER_TIMEOUT_MS")) {
            self.query.worker_timeout_ms = timeout;
        }

        // Live overrides
        if let Some(hz) = parsed(var("LIVE_THROTTLE_HZ")) {
            self.live.throttle_hz = hz;
        }
        if let Some(domain) = parsed(var("DDS_DOMAIN")) {
            self.live.dds_domain = domain;
        }

        // Logging overrides
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Historian Configuration
#
# Environment variables override these settings:
# - HOST, PORT, MAX_SOCKETS
# - BAG_DIR
# - MAX_RANGE_HOURS, POOL_SIZE, WORKER_TIMEOUT_MS
# - LIVE_THROTTLE_HZ, DDS_DOMAIN
# - LOG_LEVEL, LOG_FORMAT

[server]
# Listen address
host = "0.0.0.0"
port = 8080

# Concurrent live WebSocket connections
max_sockets = 128

# Allowed CORS origins (empty allows any)
cors_origins = []

[catalog]
# Directory holding recorded .mcap files
bag_dir = "./bags"

# Coalescing window for directory change notifications (ms)
debounce_ms = 100

# Periodic rescan when no notification arrived (ms)
rescan_interval_ms = 3000

# Watch the directory for changes; set false on filesystems without
# notifications to rely on the periodic rescan alone
watch = true

[query]
# Longest accepted range query window (hours)
max_range_hours = 24

# Worker threads (defaults to available parallelism minus one)
# pool_size = 4

# Per-query deadline (ms)
worker_timeout_ms = 30000

# Open log readers cached per worker
reader_cache_capacity = 32

# Lines buffered between a worker and its response
stream_buffer = 256

[live]
# Flush rate of live rooms and upper bound for client rates (Hz)
throttle_hz = 10

# Message bus domain id
dds_domain = 0

# Batches buffered per live client before batches are dropped
client_buffer = 64

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        let defaults = Config::default();

        assert_eq!(config.server.port, defaults.server.port);
        assert_eq!(config.catalog.bag_dir, "./bags");
        assert!(config.catalog.watch);
        assert_eq!(config.query.max_range_hours, 24);
        assert_eq!(config.query.pool_size, None);
        assert_eq!(config.live.throttle_hz, 10);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("[query]\nworker_timeout_ms = 500\n").unwrap();
        assert_eq!(config.query.worker_timeout_ms, 500);
        assert_eq!(config.query.reader_cache_capacity, 32);
        assert_eq!(config.server.max_sockets, 128);

        let polling: Config = toml::from_str("[catalog]\nwatch = false\n").unwrap();
        assert!(!polling.catalog.catalog_config().watch);
    }

    #[test]
    fn test_overrides_ignore_invalid_numbers() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "9000"),
            ("BAG_DIR", "/data/bags"),
            ("POOL_SIZE", "3"),
            ("LIVE_THROTTLE_HZ", "fast"),
            ("MAX_RANGE_HOURS", "-1"),
            ("LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.catalog.bag_dir, "/data/bags");
        assert_eq!(config.query.pool_size, Some(3));
        assert_eq!(config.live.throttle_hz, 10);
        assert_eq!(config.query.max_range_hours, 24);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_component_configs() {
        let mut config = Config::default();
        config.query.pool_size = Some(0);
        config.query.worker_timeout_ms = 1500;

        let pool = config.query.pool_config();
        assert!(pool.size >= 1);
        assert_eq!(pool.task_timeout, Duration::from_millis(1500));
        assert_eq!(config.query.max_range_ms(), 24 * 3_600_000);
        assert_eq!(config.live.live_config().throttle_hz, 10);
        assert_eq!(
            config.catalog.catalog_config().rescan_interval,
            Duration::from_secs(3)
        );
    }
}
