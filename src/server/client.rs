//! Connection actor
//!
//! Each WebSocket connection runs two halves:
//!
//! - **read pump** (inline): reads frames under a liveness deadline and
//!   dispatches text/binary messages through the action registry
//! - **write pump** (spawned): drains the outbound queue, writing each response
//!   under a write deadline, and pings the peer on a fixed period
//!
//! Both halves share the connection's cancellation token. Whichever side fails
//! first cancels it; the other side then stops, the connection leaves the hub,
//! and crawls started from it stop.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hub::{ClientHandle, HubHandle};
use super::session::{ConnectionId, Outbox, Session};
use crate::actions::{ActionRegistry, ClientResponse};

/// Transport limits for one connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest accepted inbound message, in bytes
    pub max_message_size: usize,
    /// Time allowed between inbound frames before the peer is considered dead
    pub pong_wait: Duration,
    /// Interval between pings; must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// Time allowed to write one frame
    pub write_wait: Duration,
    /// Outbound queue bound
    pub send_queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            max_message_size: 32786,
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
            send_queue_capacity: 256,
        }
    }
}

impl ConnectionConfig {
    /// Protocol-level limits enforced by the WebSocket codec
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

/// Run one connection to completion
pub async fn serve_client<S>(
    ws: S,
    hub: HubHandle,
    registry: Arc<ActionRegistry>,
    config: ConnectionConfig,
) where
    S: Stream<Item = Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin
        + Send
        + 'static,
{
    let id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(config.send_queue_capacity.max(1));

    hub.register(ClientHandle {
        id,
        cancel: cancel.clone(),
    })
    .await;
    info!(client = %id, "Client connected");

    let (sink, stream) = ws.split();
    let writer = tokio::spawn(write_pump(id, sink, rx, cancel.clone(), config.clone()));

    let session = Session::new(Outbox::new(id, tx, cancel.clone()), cancel.clone());
    read_pump(stream, &session, &registry, &config).await;

    hub.unregister(id).await;
    cancel.cancel();
    if let Err(e) = writer.await {
        warn!(client = %id, error = %e, "Write pump panicked");
    }
    info!(client = %id, "Client disconnected");
}

async fn read_pump<R>(
    mut stream: R,
    session: &Session,
    registry: &ActionRegistry,
    config: &ConnectionConfig,
) where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let id = session.client_id();
    let cancel = session.cancellation();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = timeout(config.pong_wait, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                info!(client = %id, "Read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(client = %id, error = %e, "Read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let raw = match message {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
            Message::Close(_) => break,
            // Any frame, pongs included, refreshes the deadline
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        if raw.len() > config.max_message_size {
            warn!(client = %id, size = raw.len(), "Message exceeds size limit");
            break;
        }

        registry.dispatch(&raw, session).await;
    }
}

async fn write_pump<W>(
    id: ConnectionId,
    mut sink: W,
    mut rx: mpsc::Receiver<ClientResponse>,
    cancel: CancellationToken,
    config: ConnectionConfig,
) where
    W: Sink<Message, Error = WsError> + Unpin,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = timeout(config.write_wait, sink.send(Message::Close(None))).await;
                break;
            }
            next = rx.recv() => match next {
                Some(response) => match serde_json::to_string(&response) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        warn!(client = %id, error = %e, "Failed to serialize response");
                        continue;
                    }
                },
                None => {
                    let _ = timeout(config.write_wait, sink.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ticker.tick() => Message::Ping(Vec::new()),
        };

        match timeout(config.write_wait, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(client = %id, error = %e, "Write failed");
                break;
            }
            Err(_) => {
                info!(client = %id, "Write deadline exceeded");
                break;
            }
        }
    }

    cancel.cancel();
}
