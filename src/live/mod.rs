//! Live Streaming
//!
//! Fans one upstream bus subscription per topic out to many WebSocket
//! clients, each throttled to its own rate:
//!
//! - **registry**: Room ownership, flush timers and client delivery
//! - **messages**: Outbound frames and inbound control messages
//! - **error**: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use historian::bus::{LocalBus, MessageBus};
//! use historian::live::{LiveConfig, LiveRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Arc::new(LocalBus::new(0));
//!     bus.advertise("/odom", "nav_msgs/msg/Odometry");
//!
//!     let registry = LiveRegistry::start(bus, LiveConfig::default());
//!     let mut client = registry.attach("/odom").await?;
//!     client.set_rate(2.0);
//!
//!     while let Some(batch) = client.recv().await {
//!         for frame in batch.iter() {
//!             println!("{}", serde_json::to_string(frame)?);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod messages;
pub mod registry;

pub use error::{LiveError, LiveResult};
pub use messages::{ControlMessage, LiveFrame};
pub use registry::{Batch, ClientId, LiveClient, LiveConfig, LiveRegistry, LiveStats};
