//! In-process message bus
//!
//! Topics are advertised and published from inside the process. The server
//! binary uses it when no external middleware is attached; tests use it to
//! drive live rooms and to observe subscription counts.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use super::{BusError, BusResult, MessageBus, Subscription, SubscriptionHandle, TopicInfo};

const SUBSCRIBER_BUFFER: usize = 1024;

#[derive(Default)]
struct LocalTopic {
    type_name: String,
    subscribers: Vec<(u64, mpsc::Sender<Value>)>,
}

#[derive(Default)]
struct Topics {
    by_name: HashMap<String, LocalTopic>,
    next_subscriber: u64,
}

/// Message bus living entirely in this process
#[derive(Clone)]
pub struct LocalBus {
    domain: u32,
    topics: Arc<Mutex<Topics>>,
}

impl LocalBus {
    pub fn new(domain: u32) -> Self {
        tracing::debug!(domain, "Local message bus created");
        Self {
            domain,
            topics: Arc::new(Mutex::new(Topics::default())),
        }
    }

    pub fn domain(&self) -> u32 {
        self.domain
    }

    fn lock(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `topic` known with the given message type
    pub fn advertise(&self, topic: &str, type_name: &str) {
        let mut topics = self.lock();
        let entry = topics.by_name.entry(topic.to_string()).or_default();
        entry.type_name = type_name.to_string();
    }

    /// Deliver a message to every subscriber of `topic`
    ///
    /// Returns the number of subscribers that accepted it. A subscriber whose
    /// buffer is full misses the message.
    pub fn publish(&self, topic: &str, message: Value) -> usize {
        let topics = self.lock();
        let Some(entry) = topics.by_name.get(topic) else {
            return 0;
        };

        entry
            .subscribers
            .iter()
            .filter(|(_, tx)| tx.try_send(message.clone()).is_ok())
            .count()
    }

    /// Number of active subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .by_name
            .get(topic)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn topics(&self) -> BusResult<Vec<TopicInfo>> {
        let topics = self.lock();
        let mut list: Vec<TopicInfo> = topics
            .by_name
            .iter()
            .map(|(topic, entry)| TopicInfo {
                topic: topic.clone(),
                type_name: entry.type_name.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.topic.cmp(&b.topic));
        Ok(list)
    }

    async fn subscribe(&self, topic: &str, type_name: &str) -> BusResult<Subscription> {
        let mut topics = self.lock();
        let id = topics.next_subscriber;
        topics.next_subscriber += 1;

        let entry = topics
            .by_name
            .get_mut(topic)
            .ok_or_else(|| BusError::TopicNotFound(topic.to_string()))?;
        if entry.type_name != type_name {
            return Err(BusError::Subscribe {
                topic: topic.to_string(),
                message: format!("type mismatch: advertised {}", entry.type_name),
            });
        }

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        entry.subscribers.push((id, tx));

        let registry = Arc::clone(&self.topics);
        let name = topic.to_string();
        let handle = SubscriptionHandle::new(move || {
            let mut topics = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = topics.by_name.get_mut(&name) {
                entry.subscribers.retain(|(sub, _)| *sub != id);
            }
        });

        tracing::debug!(topic = %topic, subscriber = id, "Local subscription opened");
        Ok(Subscription {
            topic: topic.to_string(),
            handle,
            messages: rx,
        })
    }
}
