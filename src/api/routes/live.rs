//! Live Routes
//!
//! - WS /live/*topic - Throttled live frames for one topic
//!
//! Close codes: 4404 when the topic is unknown, 1013 when the socket limit is
//! reached, 1011 when the live registry is unavailable.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

use super::normalize_topic;
use crate::api::state::AppState;
use crate::live::{ControlMessage, LiveClient, LiveError};

pub const CLOSE_TOPIC_NOT_FOUND: u16 = 4404;
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// WebSocket upgrade handler for /live/*topic
pub async fn live_handler(
    ws: WebSocketUpgrade,
    Path(topic): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let topic = normalize_topic(&topic);
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, topic: String) {
    let (_permit, client) = match admit(&state, &topic).await {
        Ok(admitted) => admitted,
        Err(frame) => {
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    let (sender, receiver) = socket.split();
    run_session(client, sender, receiver).await;
}

/// Take a socket permit and attach to the topic's room, or say how the
/// socket must be closed
pub(crate) async fn admit(
    state: &AppState,
    topic: &str,
) -> Result<(OwnedSemaphorePermit, LiveClient), CloseFrame<'static>> {
    let Ok(permit) = Arc::clone(&state.sockets).try_acquire_owned() else {
        tracing::warn!(topic = %topic, limit = state.config.max_sockets, "Live socket limit reached");
        return Err(close_frame(CLOSE_TRY_AGAIN_LATER, "too many connections"));
    };

    match state.live.attach(topic).await {
        Ok(client) => Ok((permit, client)),
        Err(LiveError::TopicNotFound(_)) => {
            tracing::debug!(topic = %topic, "Live topic not found");
            Err(close_frame(CLOSE_TOPIC_NOT_FOUND, "topic not found"))
        }
        Err(e) => {
            tracing::error!(topic = %topic, error = %e, "Failed to attach live client");
            Err(close_frame(CLOSE_INTERNAL_ERROR, "live stream unavailable"))
        }
    }
}

fn close_frame(code: u16, reason: &'static str) -> CloseFrame<'static> {
    CloseFrame {
        code,
        reason: reason.into(),
    }
}

/// Pump batches to the client and apply its control frames until either
/// side goes away
pub(crate) async fn run_session<W, R>(mut client: LiveClient, mut sender: W, mut receiver: R)
where
    W: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let client_id = client.id();
    let topic = client.topic().to_string();

    loop {
        tokio::select! {
            batch = client.recv() => {
                let Some(batch) = batch else {
                    tracing::debug!(client = %client_id, "Room closed");
                    break;
                };
                if send_batch(&mut sender, &batch).await.is_err() {
                    tracing::debug!(client = %client_id, "WebSocket send failed, closing connection");
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(ControlMessage::Rate { value }) = ControlMessage::parse(&text) {
                        client.set_rate(value);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(client = %client_id, "Client requested close");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(client = %client_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    }

    tracing::debug!(client = %client_id, topic = %topic, "Live session ended");
}

async fn send_batch<W>(sender: &mut W, batch: &crate::live::Batch) -> Result<(), ()>
where
    W: Sink<Message> + Unpin,
{
    for frame in batch.iter() {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize live frame");
                continue;
            }
        };
        sender.send(Message::Text(text)).await.map_err(|_| ())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::state::ApiConfig;
    use crate::bus::{BusClient, BusError, LocalBus, MessageBus};
    use crate::catalog::{CatalogConfig, FileCatalog};
    use crate::live::{LiveConfig, LiveFrame, LiveRegistry};
    use crate::workers::{PoolConfig, WorkerPool};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    async fn test_state(bus: Arc<dyn MessageBus>, max_sockets: usize) -> AppState {
        let dir = tempdir().unwrap();
        let mut catalog_config = CatalogConfig::new(dir.path());
        catalog_config.watch = false;
        let catalog = Arc::new(FileCatalog::start(catalog_config).await);

        let pool = WorkerPool::start(PoolConfig {
            size: 1,
            ..PoolConfig::default()
        });
        let live = LiveRegistry::start(Arc::clone(&bus), LiveConfig::default());
        let config = ApiConfig {
            max_sockets,
            ..ApiConfig::default()
        };
        AppState::new(catalog, pool, live, bus, config)
    }

    fn odom_bus() -> Arc<dyn MessageBus> {
        let bus = LocalBus::new(0);
        bus.advertise("/odom", "nav_msgs/msg/Odometry");
        Arc::new(bus)
    }

    #[tokio::test]
    async fn test_unknown_topic_closes_with_4404() {
        let state = test_state(odom_bus(), 4).await;

        let frame = admit(&state, "/scan").await.err().unwrap();
        assert_eq!(frame.code, CLOSE_TOPIC_NOT_FOUND);
        assert_eq!(frame.reason, "topic not found");
        assert_eq!(state.open_sockets(), 0);
    }

    #[tokio::test]
    async fn test_socket_limit_closes_with_1013() {
        let state = test_state(odom_bus(), 1).await;

        let first = admit(&state, "/odom").await.ok().unwrap();
        let frame = admit(&state, "/odom").await.err().unwrap();
        assert_eq!(frame.code, CLOSE_TRY_AGAIN_LATER);
        assert_eq!(frame.reason, "too many connections");

        drop(first);
        assert!(admit(&state, "/odom").await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_bus_closes_with_1011() {
        let bus: Arc<dyn MessageBus> = Arc::new(BusClient::new(|| async {
            Err::<Arc<dyn MessageBus>, _>(BusError::Unavailable("domain not reachable".into()))
        }));
        let state = test_state(bus, 4).await;

        let frame = admit(&state, "/odom").await.err().unwrap();
        assert_eq!(frame.code, CLOSE_INTERNAL_ERROR);
        assert_eq!(frame.reason, "live stream unavailable");
        assert_eq!(state.open_sockets(), 0);
    }

    fn channel_sink(tx: mpsc::UnboundedSender<Message>) -> impl Sink<Message, Error = ()> + Unpin {
        Box::pin(futures_util::sink::unfold(tx, |tx, msg: Message| async move {
            tx.send(msg).map_err(|_| ())?;
            Ok::<_, ()>(tx)
        }))
    }

    fn channel_stream(
        rx: mpsc::UnboundedReceiver<Message>,
    ) -> impl Stream<Item = Result<Message, axum::Error>> + Unpin {
        Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (Ok(msg), rx))
        }))
    }

    #[tokio::test]
    async fn test_session_forwards_frames_and_detaches() {
        let bus = Arc::new(LocalBus::new(0));
        bus.advertise("/odom", "nav_msgs/msg/Odometry");
        let registry = LiveRegistry::start(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            LiveConfig {
                throttle_hz: 50,
                client_buffer: 8,
            },
        );
        let client = registry.attach("/odom").await.unwrap();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let session = tokio::spawn(run_session(client, channel_sink(out_tx), channel_stream(in_rx)));

        in_tx
            .send(Message::Text(r#"{"type":"rate","value":5}"#.to_string()))
            .unwrap();
        bus.publish("/odom", json!({"x": 1}));

        let msg = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        let frame: LiveFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame.data, json!({"x": 1}));

        in_tx.send(Message::Close(None)).unwrap();
        session.await.unwrap();

        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.rooms, 0);
        assert_eq!(bus.subscriber_count("/odom"), 0);
    }
}
