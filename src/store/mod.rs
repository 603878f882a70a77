//! Content store collaborator
//!
//! The content store owns archived URL entities and the raw bytes behind them.
//! Archway only needs a narrow surface from it: read/save an entity by URL,
//! fetch a URL (returning the refreshed entity plus its outbound links), and
//! read/update an entity by its content identifier for title projection.
//!
//! Link extraction and blob caching live behind this trait.

mod memory;

pub use memory::{MemoryContentStore, Page};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error type for content store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("content store error: {0}")]
    Backend(String),

    /// Remote fetch failed; the message describes the remote failure
    #[error("{0}")]
    Fetch(String),
}

/// An archived URL as known to the content store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlEntity {
    pub url: String,
    /// Content identifier of the last fetched body (empty until fetched)
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_get: Option<DateTime<Utc>>,
}

impl UrlEntity {
    /// Placeholder entity for a URL that has never been archived
    pub fn placeholder(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Outbound link discovered on a fetched page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    /// URL of the page the link was found on
    pub src: String,
    /// Destination entity, used to drive the secondary fetch
    pub dst: UrlEntity,
}

/// Content store surface used by the crawler and the ledger
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Read the entity for a URL; `StoreError::NotFound` when unknown
    async fn read_url(&self, url: &str) -> Result<UrlEntity, StoreError>;

    /// Persist an entity (insert or replace by URL)
    async fn save_url(&self, entity: &UrlEntity) -> Result<(), StoreError>;

    /// Fetch a URL's content, returning the refreshed entity and its outbound links
    async fn fetch(&self, url: &str) -> Result<(UrlEntity, Vec<Link>), StoreError>;

    /// Read an entity by its content identifier
    async fn read_by_hash(&self, hash: &str) -> Result<UrlEntity, StoreError>;

    /// Overwrite an existing entity
    async fn update(&self, entity: &UrlEntity) -> Result<(), StoreError>;
}
