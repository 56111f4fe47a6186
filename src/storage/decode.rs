//! Payload decoding
//!
//! Turns a raw message payload into JSON according to the channel's message
//! encoding. JSON payloads are parsed; encodings this service has no schema
//! decoder for are wrapped in a hex envelope so every output line stays valid
//! JSON.

use serde::Serialize;
use serde_json::{json, Value};

use super::types::{nanos_to_millis, ChannelMeta};

/// One output record of a range query
#[derive(Debug, Clone, Serialize)]
pub struct RangeRecord<'a> {
    /// Log time in epoch milliseconds
    pub t: i64,
    pub topic: &'a str,
    pub data: Value,
}

/// Decode a payload using the channel's message encoding
pub fn decode_payload(channel: &ChannelMeta, data: &[u8]) -> Value {
    match channel.message_encoding.as_str() {
        "json" => match serde_json::from_slice(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(topic = %channel.topic, error = %e, "Invalid JSON payload");
                raw_envelope(channel, data)
            }
        },
        _ => raw_envelope(channel, data),
    }
}

fn raw_envelope(channel: &ChannelMeta, data: &[u8]) -> Value {
    json!({
        "encoding": channel.message_encoding,
        "schema": channel.schema_name,
        "data": hex::encode(data),
    })
}

/// Serialize one message as a newline-terminated JSON line
pub fn render_line(channel: &ChannelMeta, log_time: u64, data: &[u8]) -> serde_json::Result<String> {
    let record = RangeRecord {
        t: nanos_to_millis(log_time),
        topic: &channel.topic,
        data: decode_payload(channel, data),
    };
    let mut line = serde_json::to_string(&record)?;
    line.push('\n');
    Ok(line)
}
