//! Archway - real-time WebSocket backbone for collaborative web archiving
//!
//! Clients hold a WebSocket open and exchange JSON action envelopes. Archway
//! routes each request to a handler, archives URLs and the pages they link to
//! through a content store, and keeps an append-only, hash-linked ledger of
//! metadata about archived content.
//!
//! ## Components
//!
//! - **Hub**: single actor owning the set of live connections
//! - **Connection actor**: read pump, write pump and bounded outbound queue per client
//! - **Action registry**: routes `*_REQUEST` envelopes to handlers
//! - **Ledger**: per (signer, subject) chains of content-addressed metadata records
//! - **Crawl orchestrator**: policy check, primary fetch and secondary link crawl

pub mod actions;
pub mod config;
pub mod crawl;
pub mod db;
pub mod hash;
pub mod ledger;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{ArchwayError, Result};
