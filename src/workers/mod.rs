//! Historian Worker Pool
//!
//! Runs range queries on a fixed set of worker threads and streams their
//! output back to async callers:
//!
//! - **pool**: Coordinator task and the cloneable `WorkerPool` handle
//! - **worker**: Worker threads and the `TaskRunner` seam
//! - **task**: Task lifecycle and the caller-side `TaskStream`
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! schedule(params) ──► coordinator ──► idle worker thread
//!                        │   ▲              │ ReaderCache + RangeQuery
//!                        │   └── events ────┤
//!                        ▼                  ▼
//!                   TaskStream ◄── bounded line channel
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use historian::storage::{RangeParams, TimeWindow};
//! use historian::workers::{PoolConfig, WorkerPool};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = WorkerPool::start(PoolConfig::default());
//!     let params = RangeParams::new(
//!         vec![PathBuf::from("bags/run_001.mcap")],
//!         "/odom",
//!         TimeWindow::new(0, 60_000)?,
//!     );
//!
//!     let mut stream = pool.schedule(params).await?;
//!     while let Some(line) = stream.next().await {
//!         print!("{}", line?);
//!     }
//!
//!     pool.drain().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod pool;
pub mod task;
pub mod worker;

pub use error::{PoolError, PoolResult};
pub use pool::{PoolConfig, PoolStats, WorkerPool};
pub use task::{TaskId, TaskState, TaskStream, WorkerId};
pub use worker::{RangeRunner, TaskRunner};
