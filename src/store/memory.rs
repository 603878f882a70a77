//! In-memory content store
//!
//! Serves scripted pages instead of performing network fetches. Used in dev mode
//! and by tests.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ContentStore, Link, StoreError, UrlEntity};
use crate::hash::{calc_hash, HashAlgorithm};

/// Scripted response for one URL
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub title: String,
    pub body: String,
    pub links: Vec<String>,
    /// When set, fetching this page fails with this message
    pub error: Option<String>,
}

impl Page {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_links<I, S>(mut self, links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.links = links.into_iter().map(Into::into).collect();
        self
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Content store backed by in-process maps
#[derive(Default)]
pub struct MemoryContentStore {
    pages: DashMap<String, Page>,
    entities: DashMap<String, UrlEntity>,
    fetches: DashMap<String, usize>,
    unavailable: AtomicBool,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for a URL
    pub fn add_page(&self, url: impl Into<String>, page: Page) {
        self.pages.insert(url.into(), page);
    }

    /// Make every entity read and write fail with a backend error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of fetches performed for a URL
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.get(url).map(|n| *n).unwrap_or(0)
    }

    /// Total number of fetches performed
    pub fn total_fetches(&self) -> usize {
        self.fetches.iter().map(|n| *n.value()).sum()
    }

    /// Current entity for a URL, if saved
    pub fn entity(&self, url: &str) -> Option<UrlEntity> {
        self.entities.get(url).map(|e| e.clone())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("content store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContentStore for MemoryContentStore {
    async fn read_url(&self, url: &str) -> Result<UrlEntity, StoreError> {
        self.check_available()?;
        self.entity(url).ok_or(StoreError::NotFound)
    }

    async fn save_url(&self, entity: &UrlEntity) -> Result<(), StoreError> {
        self.check_available()?;
        self.entities.insert(entity.url.clone(), entity.clone());
        Ok(())
    }

    async fn fetch(&self, url: &str) -> Result<(UrlEntity, Vec<Link>), StoreError> {
        *self.fetches.entry(url.to_string()).or_insert(0) += 1;

        let page = self
            .pages
            .get(url)
            .map(|p| p.clone())
            .ok_or_else(|| StoreError::Fetch(format!("Get {}: no such host", url)))?;

        if let Some(message) = page.error {
            return Err(StoreError::Fetch(message));
        }

        let mut entity = self.entity(url).unwrap_or_else(|| UrlEntity::placeholder(url));
        entity.hash = calc_hash(page.body.as_bytes(), HashAlgorithm::Sha2_256);
        entity.status = Some(200);
        entity.content_type = Some("text/html; charset=utf-8".to_string());
        entity.last_get = Some(Utc::now());
        if entity.title.is_empty() {
            entity.title = page.title.clone();
        }
        self.entities.insert(url.to_string(), entity.clone());

        let links = page
            .links
            .iter()
            .map(|dst| Link {
                src: url.to_string(),
                dst: self
                    .entity(dst)
                    .unwrap_or_else(|| UrlEntity::placeholder(dst.clone())),
            })
            .collect();

        Ok((entity, links))
    }

    async fn read_by_hash(&self, hash: &str) -> Result<UrlEntity, StoreError> {
        self.check_available()?;
        self.entities
            .iter()
            .find(|e| e.hash == hash)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, entity: &UrlEntity) -> Result<(), StoreError> {
        self.check_available()?;
        match self.entities.get_mut(&entity.url) {
            Some(mut existing) => {
                *existing = entity.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }
}
