//! Outbound queue handle and per-connection dispatch context
//!
//! `Outbox` is the only way anything delivers a response to a client. It wraps
//! the bounded queue drained by the connection's write pump: a full queue
//! blocks the producer, and a torn-down connection (cancelled token) releases
//! every blocked producer with `SendError`.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::actions::ClientResponse;

/// Identity of one client connection
pub type ConnectionId = Uuid;

/// The connection is gone; the response was dropped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection {0} is closed")]
pub struct SendError(pub ConnectionId);

/// Producer side of a connection's outbound queue
#[derive(Debug, Clone)]
pub struct Outbox {
    id: ConnectionId,
    tx: mpsc::Sender<ClientResponse>,
    closed: CancellationToken,
}

impl Outbox {
    pub fn new(
        id: ConnectionId,
        tx: mpsc::Sender<ClientResponse>,
        closed: CancellationToken,
    ) -> Self {
        Self { id, tx, closed }
    }

    /// Enqueue a response, waiting while the queue is full
    pub async fn send(&self, response: ClientResponse) -> Result<(), SendError> {
        tokio::select! {
            _ = self.closed.cancelled() => {
                debug!(client = %self.id, "Dropping response for closed connection");
                Err(SendError(self.id))
            }
            sent = self.tx.send(response) => sent.map_err(|_| SendError(self.id)),
        }
    }

    /// Whether the connection has been torn down
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Context handed to request handlers
#[derive(Debug, Clone)]
pub struct Session {
    outbox: Outbox,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(outbox: Outbox, cancel: CancellationToken) -> Self {
        Self { outbox, cancel }
    }

    /// Session with its own queue, for driving handlers without a socket
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<ClientResponse>) {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let outbox = Outbox::new(Uuid::new_v4(), tx, cancel.clone());
        (Self::new(outbox, cancel), rx)
    }

    pub fn client_id(&self) -> ConnectionId {
        self.outbox.id()
    }

    pub async fn send(&self, response: ClientResponse) -> Result<(), SendError> {
        self.outbox.send(response).await
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Token cancelled when the connection is torn down
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
