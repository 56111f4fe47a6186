//! Historian Storage Layer
//!
//! Read-only access to recorded MCAP log files:
//!
//! - **types**: Query window, range parameters, decimation
//! - **reader**: Memory-mapped log reader with summary-only open
//! - **cache**: Per-worker LRU cache of open readers
//! - **range**: Lazy range query engine
//! - **decode**: Payload decoding into JSON lines
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Read Path:
//!   RangeParams → ReaderCache → file bounds → chunk indexes → decompress → filter → lines
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use historian::storage::{RangeParams, RangeQuery, ReaderCache, TimeWindow};
//! use std::path::PathBuf;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cache = ReaderCache::new(32);
//!     let params = RangeParams::new(
//!         vec![PathBuf::from("bags/run_002.mcap"), PathBuf::from("bags/run_001.mcap")],
//!         "/odom",
//!         TimeWindow::new(1_700_000_000_000, 1_700_000_060_000)?,
//!     )
//!     .decimate(10);
//!
//!     for line in RangeQuery::new(&mut cache, &params) {
//!         print!("{}", line?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod decode;
pub mod error;
pub mod range;
pub mod reader;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export commonly used types
pub use cache::{CacheStats, CachedReader, ReaderCache, DEFAULT_READER_CAPACITY};
pub use decode::{decode_payload, render_line, RangeRecord};
pub use error::{StorageError, StorageResult};
pub use range::{RangeQuery, ScanStats};
pub use reader::{probe_channel, LogReader};
pub use types::{
    nanos_to_millis, ChannelMeta, ChannelRef, Decimator, RangeParams, TimeWindow,
    NANOS_PER_MILLI,
};
