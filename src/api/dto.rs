//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.

use serde::{Deserialize, Serialize};

use crate::live::LiveStats;
use crate::workers::PoolStats;

// ============================================
// RANGE DTOs
// ============================================

/// Query string of `GET /range/*topic`
///
/// Values are kept as text so that malformed numbers produce a JSON 400
/// instead of the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct RangeQueryParams {
    /// Window start, epoch milliseconds
    pub start: Option<String>,
    /// Window end, epoch milliseconds
    pub end: Option<String>,
    /// Keep every Nth message (default 1)
    pub decimate: Option<String>,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok"
    pub status: String,
    /// Log files currently in the catalog
    pub files: usize,
    /// Worker pool state, absent once the pool has shut down
    pub pool: Option<PoolStats>,
    /// Live rooms and clients
    pub live: Option<LiveStats>,
    /// Open live sockets
    pub sockets: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
