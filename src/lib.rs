//! # Historian
//!
//! Time-indexed access to recorded robotics telemetry, plus throttled live
//! streams from the message bus.
//!
//! ## Features
//!
//! - **Range queries**: Messages for one topic in a time window, streamed as
//!   newline-delimited JSON, with optional decimation
//! - **Isolation**: Queries run on a bounded pool of worker threads with
//!   per-task timeouts and crash recovery
//! - **Live streams**: One bus subscription per topic, fanned out to WebSocket
//!   clients at a per-client rate
//! - **Catalog**: Log directory kept current through file notifications with a
//!   periodic rescan as fallback
//!
//! ## Modules
//!
//! - [`catalog`]: Sorted list of available log files
//! - [`storage`]: MCAP reader, reader cache and range query engine
//! - [`workers`]: Worker pool for range queries
//! - [`bus`]: Message bus boundary
//! - [`live`]: Live room registry
//! - [`api`]: HTTP and WebSocket server with Axum
//! - [`config`]: Configuration file and environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use historian::storage::{RangeParams, TimeWindow};
//! use historian::workers::{PoolConfig, WorkerPool};
//! use futures_util::StreamExt;
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = WorkerPool::start(PoolConfig::default());
//!
//!     let params = RangeParams::new(
//!         vec![PathBuf::from("bags/run_001.mcap")],
//!         "/odom",
//!         TimeWindow::new(1_700_000_000_000, 1_700_000_060_000)?,
//!     );
//!
//!     let mut lines = pool.schedule(params).await?;
//!     while let Some(line) = lines.next().await {
//!         print!("{}", line?);
//!     }
//!
//!     pool.drain().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bus;
pub mod catalog;
pub mod config;
pub mod live;
pub mod storage;
pub mod workers;

// Re-export top-level types for convenience
pub use storage::{RangeParams, RangeQuery, ReaderCache, StorageError, StorageResult, TimeWindow};

pub use workers::{PoolConfig, PoolError, PoolResult, PoolStats, TaskStream, WorkerPool};

pub use catalog::{CatalogConfig, FileCatalog};

pub use bus::{BusClient, BusError, LocalBus, MessageBus, TopicInfo};

pub use live::{LiveClient, LiveConfig, LiveError, LiveFrame, LiveRegistry};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig};
