//! Connection hub
//!
//! A single actor owns the set of live connections. Registration, removal and
//! shutdown arrive as commands over one channel, so membership changes are
//! serialized without a lock. Removing a connection cancels its token, which
//! tears down its pumps and any crawl it started.

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::ConnectionId;

const COMMAND_CAPACITY: usize = 256;

/// A connection as known to the hub
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ConnectionId,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
enum HubCommand {
    Register(ClientHandle),
    Unregister(ConnectionId),
    Count(oneshot::Sender<usize>),
    Shutdown,
}

/// Hub actor state
pub struct Hub {
    clients: HashMap<ConnectionId, ClientHandle>,
    rx: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Start the hub, returning its handle and task
    pub fn spawn() -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let hub = Hub {
            clients: HashMap::new(),
            rx,
        };
        let task = tokio::spawn(hub.run());
        (HubHandle { tx }, task)
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                HubCommand::Register(client) => {
                    debug!(client = %client.id, "Client registered");
                    self.clients.insert(client.id, client);
                }
                HubCommand::Unregister(id) => {
                    if let Some(client) = self.clients.remove(&id) {
                        client.cancel.cancel();
                        debug!(client = %id, "Client unregistered");
                    }
                }
                HubCommand::Count(reply) => {
                    let _ = reply.send(self.clients.len());
                }
                HubCommand::Shutdown => break,
            }
        }

        info!(clients = self.clients.len(), "Hub shutting down");
        for (_, client) in self.clients.drain() {
            client.cancel.cancel();
        }

        // Refuse further commands and cancel anything that raced shutdown
        self.rx.close();
        while let Some(command) = self.rx.recv().await {
            match command {
                HubCommand::Register(client) => client.cancel.cancel(),
                HubCommand::Count(reply) => {
                    let _ = reply.send(0);
                }
                HubCommand::Unregister(_) | HubCommand::Shutdown => {}
            }
        }
    }
}

/// Cloneable handle to the hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Add a connection; a stopped hub cancels it immediately
    pub async fn register(&self, client: ClientHandle) {
        let cancel = client.cancel.clone();
        if self.tx.send(HubCommand::Register(client)).await.is_err() {
            warn!("Hub is not running; rejecting connection");
            cancel.cancel();
        }
    }

    /// Remove a connection and cancel its token
    pub async fn unregister(&self, id: ConnectionId) {
        if self.tx.send(HubCommand::Unregister(id)).await.is_err() {
            debug!(client = %id, "Hub is not running; nothing to unregister");
        }
    }

    /// Number of registered connections
    pub async fn connection_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(HubCommand::Count(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Cancel every connection and stop the hub
    pub async fn shutdown(&self) {
        let _ = self.tx.send(HubCommand::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn client() -> ClientHandle {
        ClientHandle {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let (hub, _task) = Hub::spawn();
        let a = client();
        let b = client();
        hub.register(a.clone()).await;
        hub.register(b.clone()).await;
        assert_eq!(hub.connection_count().await, 2);

        hub.unregister(a.id).await;
        assert_eq!(hub.connection_count().await, 1);
        assert!(a.cancel.is_cancelled());
        assert!(!b.cancel.is_cancelled());

        // Unknown ids are ignored
        hub.unregister(a.id).await;
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_every_client() {
        let (hub, task) = Hub::spawn();
        let clients: Vec<_> = (0..3).map(|_| client()).collect();
        for c in &clients {
            hub.register(c.clone()).await;
        }

        hub.shutdown().await;
        tokio_test::assert_ok!(task.await);
        assert!(clients.iter().all(|c| c.cancel.is_cancelled()));

        let late = client();
        hub.register(late.clone()).await;
        assert!(late.cancel.is_cancelled());
        assert_eq!(hub.connection_count().await, 0);
    }
}
