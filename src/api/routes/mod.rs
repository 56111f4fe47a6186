//! API Routes
//!
//! Route handlers organized by functionality.

pub mod health;
pub mod live;
pub mod range;
pub mod topics;

/// Absolute topic name from a wildcard path segment
///
/// `robot/odom`, `/robot/odom` and `//robot/odom` all become `/robot/odom`.
pub fn normalize_topic(raw: &str) -> String {
    format!("/{}", raw.trim_start_matches('/'))
}
