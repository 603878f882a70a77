//! WebSocket server: connection hub, connection actors and the HTTP listener

pub mod client;
pub mod http;
pub mod hub;
pub mod session;

pub use client::{serve_client, ConnectionConfig};
pub use http::{run, serve, AppState};
pub use hub::{ClientHandle, Hub, HubHandle};
pub use session::{ConnectionId, Outbox, SendError, Session};
