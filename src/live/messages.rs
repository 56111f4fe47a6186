//! Live stream wire types
//!
//! Frames sent to clients are `{"t": <arrival ms>, "data": <message>}`, one
//! WebSocket text message per frame. Clients may send a rate change:
//!
//! ```text
//! {"type": "rate", "value": 2}
//! {"rate": 2}                    (legacy form)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One live message, tagged with its arrival time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveFrame {
    /// Arrival time in epoch milliseconds
    pub t: i64,
    pub data: Value,
}

impl LiveFrame {
    /// Frame stamped with the current time
    pub fn now(data: Value) -> Self {
        Self {
            t: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }
}

/// Control messages accepted from live clients
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Change this client's delivery rate (Hz)
    Rate { value: f64 },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InboundFrame {
    Tagged(ControlMessage),
    Legacy { rate: f64 },
}

impl ControlMessage {
    /// Parse and validate an inbound text frame
    ///
    /// Returns `None` for malformed frames and for rates that are not a
    /// positive finite number.
    pub fn parse(text: &str) -> Option<Self> {
        let message = match serde_json::from_str::<InboundFrame>(text) {
            Ok(InboundFrame::Tagged(message)) => message,
            Ok(InboundFrame::Legacy { rate }) => ControlMessage::Rate { value: rate },
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed control frame");
                return None;
            }
        };

        match message {
            ControlMessage::Rate { value } if value.is_finite() && value > 0.0 => Some(message),
            ControlMessage::Rate { value } => {
                tracing::debug!(rate = value, "Ignoring invalid rate");
                None
            }
        }
    }
}
