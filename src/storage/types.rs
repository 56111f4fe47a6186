//! Core data types for range queries over log files
//!
//! - `TimeWindow`: inclusive query window in epoch milliseconds
//! - `RangeParams`: everything a worker needs to run one range query
//! - `Decimator`: global every-Nth selector shared across a whole query
//! - `ChannelRef` / `ChannelMeta`: file-local channel bindings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::error::{StorageError, StorageResult};

/// Nanoseconds per millisecond; MCAP times are nanoseconds since the epoch.
pub const NANOS_PER_MILLI: u64 = 1_000_000;

/// Inclusive time window `[start_ms, end_ms]` in epoch milliseconds
///
/// On-disk log times are nanoseconds. A nanosecond timestamp falls inside the
/// window when its millisecond truncation does, so the whole of the last
/// millisecond is included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    /// Create a window, rejecting `start_ms > end_ms`
    pub fn new(start_ms: i64, end_ms: i64) -> StorageResult<Self> {
        if start_ms > end_ms {
            return Err(StorageError::InvalidWindow);
        }
        Ok(Self { start_ms, end_ms })
    }

    /// Window length in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    /// Check whether a nanosecond log time falls inside the window
    pub fn contains_nanos(&self, log_time: u64) -> bool {
        let ms = nanos_to_millis(log_time);
        ms >= self.start_ms && ms <= self.end_ms
    }

    /// Check whether a nanosecond interval `[start, end]` overlaps the window
    pub fn overlaps_nanos(&self, start: u64, end: u64) -> bool {
        nanos_to_millis(end) >= self.start_ms && nanos_to_millis(start) <= self.end_ms
    }
}

/// Truncate a nanosecond timestamp to milliseconds
pub fn nanos_to_millis(nanos: u64) -> i64 {
    (nanos / NANOS_PER_MILLI) as i64
}

/// Parameters of one scheduled range query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeParams {
    /// Files to scan, in traversal order (newest first from the catalog)
    pub files: Vec<PathBuf>,
    /// Topic being queried; channel ids are re-resolved per file
    pub topic: String,
    /// Channel id found by the probe in the first file that binds the topic
    pub probed_channel: Option<u16>,
    /// Inclusive time window
    pub window: TimeWindow,
    /// Keep every Nth qualifying message (N >= 1)
    pub decimate: u32,
}

impl RangeParams {
    /// Build params for a topic query without a probed channel
    pub fn new(files: Vec<PathBuf>, topic: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            files,
            topic: topic.into(),
            probed_channel: None,
            window,
            decimate: 1,
        }
    }

    /// Builder method: set decimation (values below 1 are treated as 1)
    pub fn decimate(mut self, every: u32) -> Self {
        self.decimate = every.max(1);
        self
    }

    /// Builder method: record the probed channel id
    pub fn probed_channel(mut self, id: u16) -> Self {
        self.probed_channel = Some(id);
        self
    }
}

/// Every-Nth selector; the counter spans the whole query, not one file
#[derive(Debug, Clone)]
pub struct Decimator {
    every: u64,
    seen: u64,
}

impl Decimator {
    pub fn new(every: u32) -> Self {
        Self {
            every: u64::from(every.max(1)),
            seen: 0,
        }
    }

    /// Register one qualifying message; true if it should be emitted
    pub fn admit(&mut self) -> bool {
        let keep = self.seen % self.every == 0;
        self.seen += 1;
        keep
    }

    /// Number of qualifying messages seen so far
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

/// A topic binding found in one specific file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelRef {
    pub path: PathBuf,
    pub channel_id: u16,
    pub topic: String,
}

/// Channel details needed to decode payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMeta {
    pub id: u16,
    pub topic: String,
    pub message_encoding: String,
    pub schema_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_rejects_inverted_bounds() {
        assert!(TimeWindow::new(10, 5).is_err());
        assert!(TimeWindow::new(5, 5).is_ok());
    }

    #[test]
    fn test_window_contains_whole_last_millisecond() {
        let window = TimeWindow::new(50, 250).unwrap();

        assert!(!window.contains_nanos(49 * NANOS_PER_MILLI + 999_999));
        assert!(window.contains_nanos(50 * NANOS_PER_MILLI));
        assert!(window.contains_nanos(250 * NANOS_PER_MILLI + 999_999));
        assert!(!window.contains_nanos(251 * NANOS_PER_MILLI));
    }

    #[test]
    fn test_window_overlap() {
        let window = TimeWindow::new(100, 200).unwrap();
        let ms = NANOS_PER_MILLI;

        assert!(window.overlaps_nanos(0, 100 * ms));
        assert!(window.overlaps_nanos(150 * ms, 160 * ms));
        assert!(window.overlaps_nanos(200 * ms, 300 * ms));
        assert!(!window.overlaps_nanos(0, 99 * ms));
        assert!(!window.overlaps_nanos(201 * ms, 300 * ms));
    }

    #[test]
    fn test_decimator_keeps_first_of_every_n() {
        let mut decimator = Decimator::new(3);
        let kept: Vec<u64> = (1..=10).filter(|_| decimator.admit()).collect();

        // 1st, 4th, 7th, 10th
        assert_eq!(kept, vec![1, 4, 7, 10]);
        assert_eq!(decimator.seen(), 10);
    }

    #[test]
    fn test_decimator_one_keeps_everything() {
        let mut decimator = Decimator::new(1);
        assert!((0..5).all(|_| decimator.admit()));
    }

    #[test]
    fn test_decimate_builder_clamps_zero() {
        let params = RangeParams::new(vec![], "/odom", TimeWindow::new(0, 1).unwrap()).decimate(0);
        assert_eq!(params.decimate, 1);
    }
}
