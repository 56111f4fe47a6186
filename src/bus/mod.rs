//! Message bus boundary
//!
//! Topic introspection and live subscriptions come from an external
//! pub/sub middleware. This module defines the seam ([`MessageBus`]), a lazily
//! connecting client ([`BusClient`]) and an in-process bus ([`LocalBus`]).
//!
//! Dropping or closing a [`SubscriptionHandle`] unsubscribes immediately.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

pub mod local;

pub use local::LocalBus;

/// Errors from the message bus
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// The bus client could not be initialized
    #[error("Message bus unavailable: {0}")]
    Unavailable(String),

    /// No publisher advertises the topic
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// Subscribing failed
    #[error("Failed to subscribe to {topic}: {message}")]
    Subscribe { topic: String, message: String },
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// A topic and its message type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub topic: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Unsubscribes when closed or dropped
pub struct SubscriptionHandle {
    on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SubscriptionHandle {
    pub fn new(on_close: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            on_close: Some(Box::new(on_close)),
        }
    }

    pub fn close(mut self) {
        self.run_close();
    }

    fn run_close(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.run_close();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.on_close.is_some())
            .finish()
    }
}

/// A live subscription: decoded messages plus the handle that ends it
#[derive(Debug)]
pub struct Subscription {
    pub topic: String,
    pub handle: SubscriptionHandle,
    pub messages: mpsc::Receiver<serde_json::Value>,
}

/// Topic introspection and live delivery
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Every known topic with its first advertised type
    async fn topics(&self) -> BusResult<Vec<TopicInfo>>;

    /// Subscribe to `topic`, delivering decoded messages of `type_name`
    async fn subscribe(&self, topic: &str, type_name: &str) -> BusResult<Subscription>;

    /// Message type of `topic`, or `None` if nobody advertises it
    async fn type_for_topic(&self, topic: &str) -> BusResult<Option<String>> {
        Ok(self
            .topics()
            .await?
            .into_iter()
            .find(|info| info.topic == topic)
            .map(|info| info.type_name))
    }
}

type Connector = Box<dyn Fn() -> BoxFuture<'static, BusResult<Arc<dyn MessageBus>>> + Send + Sync>;

/// Bus client that connects on first use
///
/// A failed connection attempt is returned to the caller and retried on the
/// next call; there is no backoff.
pub struct BusClient {
    connector: Connector,
    bus: Mutex<Option<Arc<dyn MessageBus>>>,
}

impl BusClient {
    pub fn new<F, Fut>(connect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BusResult<Arc<dyn MessageBus>>> + Send + 'static,
    {
        Self {
            connector: Box::new(move || -> BoxFuture<'static, BusResult<Arc<dyn MessageBus>>> {
                Box::pin(connect())
            }),
            bus: Mutex::new(None),
        }
    }

    async fn connected(&self) -> BusResult<Arc<dyn MessageBus>> {
        let mut bus = self.bus.lock().await;
        if let Some(bus) = bus.as_ref() {
            return Ok(Arc::clone(bus));
        }

        match (self.connector)().await {
            Ok(connected) => {
                tracing::info!("Message bus connected");
                *bus = Some(Arc::clone(&connected));
                Ok(connected)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Message bus initialization failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MessageBus for BusClient {
    async fn topics(&self) -> BusResult<Vec<TopicInfo>> {
        self.connected().await?.topics().await
    }

    async fn subscribe(&self, topic: &str, type_name: &str) -> BusResult<Subscription> {
        self.connected().await?.subscribe(topic, type_name).await
    }

    async fn type_for_topic(&self, topic: &str) -> BusResult<Option<String>> {
        self.connected().await?.type_for_topic(topic).await
    }
}
