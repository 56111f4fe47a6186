//! Live room registry
//!
//! One coordinator task owns every room. A room holds exactly one upstream
//! subscription for its topic, a queue of frames received since the last
//! flush, and the attached clients. A per-room timer ticks at the global
//! throttle rate; on each tick the queued batch goes to every client whose own
//! interval has elapsed. Clients that are skipped miss that batch.
//!
//! ```text
//! bus ─► forwarder ─┐
//!                   ├─► registry task ─► room queue ─(tick)─► client channels
//! timer ────────────┘
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::bus::{MessageBus, SubscriptionHandle};

use super::error::{LiveError, LiveResult};
use super::messages::LiveFrame;

/// Identifier of an attached live client
pub type ClientId = Uuid;

/// Frames delivered to a client in one flush, shared between clients
pub type Batch = Arc<[LiveFrame]>;

/// Live registry configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Room flush rate and upper bound for client rates (Hz)
    pub throttle_hz: u32,
    /// Batches buffered per client before new batches are dropped
    pub client_buffer: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            throttle_hz: 10,
            client_buffer: 64,
        }
    }
}

impl LiveConfig {
    fn global_hz(&self) -> f64 {
        f64::from(self.throttle_hz.max(1))
    }

    fn tick_period(&self) -> Duration {
        interval_for(self.global_hz())
    }

    /// Minimum interval between sends for a requested rate
    fn client_interval(&self, requested_hz: f64) -> Duration {
        interval_for(requested_hz.clamp(1.0, self.global_hz()))
    }
}

fn interval_for(hz: f64) -> Duration {
    Duration::from_nanos((1e9 / hz) as u64)
}

/// Registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiveStats {
    pub rooms: usize,
    pub clients: usize,
}

enum RegistryMsg {
    Attach {
        topic: String,
        reply: oneshot::Sender<LiveResult<LiveClient>>,
    },
    Detach {
        topic: String,
        client: ClientId,
    },
    SetRate {
        topic: String,
        client: ClientId,
        hz: f64,
    },
    Upstream {
        topic: String,
        room: u64,
        frame: LiveFrame,
    },
    Tick {
        topic: String,
        room: u64,
    },
    Stats {
        reply: oneshot::Sender<LiveStats>,
    },
    Shutdown,
}

struct ClientSlot {
    frames: mpsc::Sender<Batch>,
    interval: Duration,
    last_sent: Option<Instant>,
}

struct Room {
    id: u64,
    type_name: String,
    subscription: Option<SubscriptionHandle>,
    clients: HashMap<ClientId, ClientSlot>,
    queue: Vec<LiveFrame>,
    timer: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl Room {
    fn flush(&mut self, topic: &str) {
        if self.queue.is_empty() {
            return;
        }
        let batch: Batch = std::mem::take(&mut self.queue).into();
        let now = Instant::now();

        for (id, client) in self.clients.iter_mut() {
            let due = client
                .last_sent
                .map(|last| now.duration_since(last) >= client.interval)
                .unwrap_or(true);
            if !due {
                continue;
            }
            client.last_sent = Some(now);

            match client.frames.try_send(Arc::clone(&batch)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(topic = %topic, client = %id, frames = batch.len(), "Client lagging, batch dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(topic = %topic, client = %id, "Client channel closed");
                }
            }
        }
    }

    /// Unsubscribe and stop the room's tasks
    fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
        self.timer.abort();
        self.forwarder.abort();
    }
}

struct Registry {
    bus: Arc<dyn MessageBus>,
    config: LiveConfig,
    tx: mpsc::UnboundedSender<RegistryMsg>,
    rooms: HashMap<String, Room>,
    next_room: u64,
}

impl Registry {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RegistryMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                RegistryMsg::Attach { topic, reply } => {
                    let result = self.attach(topic).await;
                    let _ = reply.send(result);
                }
                RegistryMsg::Detach { topic, client } => self.detach(&topic, client),
                RegistryMsg::SetRate { topic, client, hz } => {
                    let interval = self.config.client_interval(hz);
                    if let Some(slot) = self
                        .rooms
                        .get_mut(&topic)
                        .and_then(|room| room.clients.get_mut(&client))
                    {
                        slot.interval = interval;
                        tracing::debug!(topic = %topic, client = %client, requested = hz, interval = ?interval, "Client rate changed");
                    }
                }
                RegistryMsg::Upstream { topic, room, frame } => {
                    if let Some(target) = self.rooms.get_mut(&topic).filter(|r| r.id == room) {
                        target.queue.push(frame);
                    }
                }
                RegistryMsg::Tick { topic, room } => {
                    if let Some(target) = self.rooms.get_mut(&topic).filter(|r| r.id == room) {
                        target.flush(&topic);
                    }
                }
                RegistryMsg::Stats { reply } => {
                    let _ = reply.send(LiveStats {
                        rooms: self.rooms.len(),
                        clients: self.rooms.values().map(|r| r.clients.len()).sum(),
                    });
                }
                RegistryMsg::Shutdown => break,
            }
        }

        for (topic, room) in self.rooms.drain() {
            tracing::debug!(topic = %topic, clients = room.clients.len(), "Closing room on shutdown");
            room.close();
        }
        tracing::info!("Live registry stopped");
    }

    async fn attach(&mut self, topic: String) -> LiveResult<LiveClient> {
        if !self.rooms.contains_key(&topic) {
            let room = self.open_room(&topic).await?;
            self.rooms.insert(topic.clone(), room);
        }

        let id = Uuid::new_v4();
        let (frames_tx, frames_rx) = mpsc::channel(self.config.client_buffer.max(1));
        let slot = ClientSlot {
            frames: frames_tx,
            interval: self.config.tick_period(),
            last_sent: None,
        };

        let room = self
            .rooms
            .get_mut(&topic)
            .ok_or_else(|| LiveError::TopicNotFound(topic.clone()))?;
        room.clients.insert(id, slot);
        tracing::info!(topic = %topic, client = %id, clients = room.clients.len(), "Live client attached");

        Ok(LiveClient {
            id,
            topic,
            type_name: room.type_name.clone(),
            frames: frames_rx,
            registry: LiveRegistry {
                tx: self.tx.clone(),
            },
        })
    }

    async fn open_room(&mut self, topic: &str) -> LiveResult<Room> {
        let type_name = self
            .bus
            .type_for_topic(topic)
            .await?
            .ok_or_else(|| LiveError::TopicNotFound(topic.to_string()))?;
        let subscription = self.bus.subscribe(topic, &type_name).await?;

        let id = self.next_room;
        self.next_room += 1;

        let forwarder = {
            let tx = self.tx.clone();
            let topic = topic.to_string();
            let mut messages = subscription.messages;
            tokio::spawn(async move {
                while let Some(data) = messages.recv().await {
                    let frame = LiveFrame::now(data);
                    let msg = RegistryMsg::Upstream {
                        topic: topic.clone(),
                        room: id,
                        frame,
                    };
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
            })
        };

        let timer = {
            let tx = self.tx.clone();
            let topic = topic.to_string();
            let period = self.config.tick_period();
            tokio::spawn(async move {
                let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticks.tick().await;
                    let msg = RegistryMsg::Tick {
                        topic: topic.clone(),
                        room: id,
                    };
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
            })
        };

        tracing::info!(topic = %topic, type_name = %type_name, "Room opened");
        Ok(Room {
            id,
            type_name,
            subscription: Some(subscription.handle),
            clients: HashMap::new(),
            queue: Vec::new(),
            timer,
            forwarder,
        })
    }

    fn detach(&mut self, topic: &str, client: ClientId) {
        let Some(room) = self.rooms.get_mut(topic) else {
            return;
        };
        if room.clients.remove(&client).is_none() {
            return;
        }
        tracing::info!(topic = %topic, client = %client, clients = room.clients.len(), "Live client detached");

        if room.clients.is_empty() {
            if let Some(room) = self.rooms.remove(topic) {
                room.close();
                tracing::info!(topic = %topic, "Room closed");
            }
        }
    }
}

/// Handle to the live registry; cheap to clone
#[derive(Clone)]
pub struct LiveRegistry {
    tx: mpsc::UnboundedSender<RegistryMsg>,
}

impl LiveRegistry {
    /// Start the registry task
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(bus: Arc<dyn MessageBus>, config: LiveConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::info!(throttle_hz = config.throttle_hz, "Live registry started");

        let registry = Registry {
            bus,
            config,
            tx: tx.clone(),
            rooms: HashMap::new(),
            next_room: 1,
        };
        tokio::spawn(registry.run(rx));

        Self { tx }
    }

    /// Attach a client to `topic`, opening its room if needed
    ///
    /// Fails with [`LiveError::TopicNotFound`] when the bus does not know the
    /// topic.
    pub async fn attach(&self, topic: &str) -> LiveResult<LiveClient> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryMsg::Attach {
                topic: topic.to_string(),
                reply,
            })
            .map_err(|_| LiveError::RegistryClosed)?;
        rx.await.map_err(|_| LiveError::RegistryClosed)?
    }

    pub async fn stats(&self) -> LiveResult<LiveStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryMsg::Stats { reply })
            .map_err(|_| LiveError::RegistryClosed)?;
        rx.await.map_err(|_| LiveError::RegistryClosed)
    }

    /// Close every room and stop the registry task
    pub fn shutdown(&self) {
        let _ = self.tx.send(RegistryMsg::Shutdown);
    }
}

/// An attached live client
///
/// Receives batches at its own rate. Dropping it detaches from the room.
pub struct LiveClient {
    id: ClientId,
    topic: String,
    type_name: String,
    frames: mpsc::Receiver<Batch>,
    registry: LiveRegistry,
}

impl LiveClient {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Next batch; `None` once the registry has closed the room
    pub async fn recv(&mut self) -> Option<Batch> {
        self.frames.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Batch> {
        self.frames.try_recv().ok()
    }

    /// Request a delivery rate, clamped to `[1, throttle_hz]`
    pub fn set_rate(&self, hz: f64) {
        let _ = self.registry.tx.send(RegistryMsg::SetRate {
            topic: self.topic.clone(),
            client: self.id,
            hz,
        });
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        let _ = self.registry.tx.send(RegistryMsg::Detach {
            topic: std::mem::take(&mut self.topic),
            client: self.id,
        });
    }
}
