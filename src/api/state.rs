//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::bus::MessageBus;
use crate::catalog::FileCatalog;
use crate::config::Config;
use crate::live::LiveRegistry;
use crate::workers::WorkerPool;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Current log files
    pub catalog: Arc<FileCatalog>,
    /// Range query workers
    pub pool: WorkerPool,
    /// Live rooms
    pub live: LiveRegistry,
    /// Topic introspection
    pub bus: Arc<dyn MessageBus>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Permits for concurrent live sockets
    pub sockets: Arc<Semaphore>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        catalog: Arc<FileCatalog>,
        pool: WorkerPool,
        live: LiveRegistry,
        bus: Arc<dyn MessageBus>,
        config: ApiConfig,
    ) -> Self {
        Self {
            catalog,
            pool,
            live,
            bus,
            sockets: Arc::new(Semaphore::new(config.max_sockets)),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Live sockets currently open
    pub fn open_sockets(&self) -> usize {
        self.config
            .max_sockets
            .saturating_sub(self.sockets.available_permits())
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Longest accepted range window in milliseconds
    pub max_range_ms: i64,
    /// Concurrent live sockets
    pub max_sockets: usize,
    /// Allowed CORS origins; empty allows any
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            max_range_ms: config.query.max_range_ms(),
            max_sockets: config.server.max_sockets,
            cors_origins: config.server.cors_origins.clone(),
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
