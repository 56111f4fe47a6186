//! MCAP fixtures for tests

use mcap::{Channel, Message, Schema, WriteOptions};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use super::types::NANOS_PER_MILLI;

/// One JSON message to write, addressed by topic and log time in ms
#[derive(Debug, Clone)]
pub struct FixtureMessage {
    pub topic: &'static str,
    pub log_time_ms: u64,
}

impl FixtureMessage {
    pub fn new(topic: &'static str, log_time_ms: u64) -> Self {
        Self { topic, log_time_ms }
    }
}

/// Write `messages` as JSON-encoded records, a few per chunk
pub fn write_log(path: &Path, messages: &[FixtureMessage]) {
    write_log_with_chunk_size(path, messages, Some(256));
}

/// Write `messages` with an explicit chunk size (bytes)
pub fn write_log_with_chunk_size(path: &Path, messages: &[FixtureMessage], chunk_size: Option<u64>) {
    let file = BufWriter::new(File::create(path).unwrap());
    let mut writer = WriteOptions::new()
        .chunk_size(chunk_size)
        .create(file)
        .unwrap();

    let schema = Arc::new(Schema {
        id: 1,
        name: "std_msgs/msg/String".to_string(),
        encoding: "jsonschema".to_string(),
        data: Cow::Borrowed(b"{}"),
    });

    let mut channels: HashMap<&str, Arc<Channel<'static>>> = HashMap::new();
    for (sequence, message) in messages.iter().enumerate() {
        let next_id = channels.len() as u16 + 1;
        let channel = channels
            .entry(message.topic)
            .or_insert_with(|| {
                Arc::new(Channel {
                    id: next_id,
                    topic: message.topic.to_string(),
                    schema: Some(Arc::clone(&schema)),
                    message_encoding: "json".to_string(),
                    metadata: BTreeMap::new(),
                })
            })
            .clone();

        let payload = serde_json::json!({ "topic": message.topic, "ms": message.log_time_ms });
        let log_time = message.log_time_ms * NANOS_PER_MILLI;
        writer
            .write(&Message {
                channel,
                sequence: sequence as u32,
                log_time,
                publish_time: log_time,
                data: Cow::Owned(serde_json::to_vec(&payload).unwrap()),
            })
            .unwrap();
    }

    writer.finish().unwrap();
}
