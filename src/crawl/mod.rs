//! Crawl orchestrator
//!
//! Archives a URL and the pages it links to:
//!
//! ```text
//! policy check ──reject──► URL_ARCHIVE_ERROR (verbatim reason)
//!      │
//! record intake ─┐
//! resolve entity ┴─fail──► URL_ARCHIVE_ERROR ("internal server error")
//!      │
//! primary fetch ───fail──► URL_ARCHIVE_ERROR (fetch error message)
//!      │
//! URL_ARCHIVE_SUCCESS, FETCH_OUTBOUND_LINKS_SUCCESS
//!      │
//! secondary fetch (throttled: one link at a time, or batch: all at once)
//! ```
//!
//! Progress leaves only through the originating connection's `Outbox`. Every
//! secondary crawl carries that connection's cancellation token and stops at
//! its next suspension point once the connection is gone.

pub mod policy;

pub use policy::{
    AllowList, ArchiveRequest, ArchiveRequestLog, MemoryArchiveLog, UrlPolicy,
};

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::envelope::{
    ClientResponse, FETCH_OUTBOUND_LINKS_SUCCESS, SERVER_REQUEST_ID, URL_SET_ERROR,
    URL_SET_LOADING, URL_SET_SUCCESS,
};
use crate::ledger::Ledger;
use crate::server::Outbox;
use crate::store::{ContentStore, Link, StoreError, UrlEntity};

/// How outbound links are fetched after the primary page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CrawlMode {
    /// One link at a time with a fixed delay, reporting loading/success/error per link
    #[default]
    Throttled,
    /// Every link concurrently, aggregated into a single completion
    Batch,
}

/// Configuration for the crawl orchestrator
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub mode: CrawlMode,
    /// Pause before each throttled link fetch
    pub link_delay: Duration,
    /// Signer id for the ledger entries the crawler writes about fetched pages
    pub ledger_key_id: Option<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            mode: CrawlMode::Throttled,
            link_delay: Duration::from_secs(3),
            ledger_key_id: None,
        }
    }
}

/// Error type for crawl operations
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("Oops! Only urls contained in the archiving allow-list can be archived. cannot archive {0}")]
    PolicyViolation(String),

    #[error("policy lookup failed: {0}")]
    Policy(StoreError),

    #[error("archive request log failed: {0}")]
    Intake(StoreError),

    #[error("entity resolution failed: {0}")]
    Resolve(StoreError),

    #[error("{0}")]
    Fetch(StoreError),

    #[error("crawl cancelled")]
    Cancelled,
}

impl CrawlError {
    /// Message safe to return to the client
    ///
    /// Policy violations and fetch failures are returned as-is; storage
    /// failures are redacted.
    pub fn client_message(&self) -> String {
        match self {
            Self::PolicyViolation(_) | Self::Fetch(_) => self.to_string(),
            Self::Policy(_) | Self::Intake(_) | Self::Resolve(_) => {
                "internal server error".to_string()
            }
            Self::Cancelled => "crawl cancelled".to_string(),
        }
    }
}

/// Result of the synchronous part of an archive
#[derive(Debug, Clone)]
pub struct PrimaryCrawl {
    pub entity: UrlEntity,
    pub links: Vec<Link>,
}

/// Ledger sink for pages the crawler fetched
#[derive(Clone)]
struct Discovery {
    ledger: Arc<Ledger>,
    key_id: String,
}

impl Discovery {
    async fn record(&self, entity: &UrlEntity) {
        if entity.hash.is_empty() {
            return;
        }

        let mut meta = Map::new();
        meta.insert("url".to_string(), Value::String(entity.url.clone()));
        if !entity.title.is_empty() {
            meta.insert("title".to_string(), Value::String(entity.title.clone()));
        }

        if let Err(e) = self.ledger.append(&self.key_id, &entity.hash, meta).await {
            warn!(url = %entity.url, error = %e, "Failed to record crawled page in ledger");
        }
    }
}

/// Drives URL archival through the content store
pub struct CrawlOrchestrator {
    config: CrawlConfig,
    policy: Arc<dyn UrlPolicy>,
    audit: Arc<dyn ArchiveRequestLog>,
    store: Arc<dyn ContentStore>,
    discovery: Option<Discovery>,
}

impl CrawlOrchestrator {
    pub fn new(
        config: CrawlConfig,
        policy: Arc<dyn UrlPolicy>,
        audit: Arc<dyn ArchiveRequestLog>,
        store: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            config,
            policy,
            audit,
            store,
            discovery: None,
        }
    }

    /// Record fetched pages in the ledger under `config.ledger_key_id`
    pub fn with_ledger(mut self, ledger: Arc<Ledger>) -> Self {
        self.discovery = self.config.ledger_key_id.clone().map(|key_id| Discovery {
            ledger,
            key_id,
        });
        self
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Reject URLs that match no allow-listed pattern
    pub async fn check_policy(&self, url: &str) -> Result<(), CrawlError> {
        match self.policy.allows(url).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CrawlError::PolicyViolation(url.to_string())),
            Err(e) => Err(CrawlError::Policy(e)),
        }
    }

    /// Policy check, intake, entity resolution and primary fetch
    pub async fn archive(&self, url: &str, user_id: &str) -> Result<PrimaryCrawl, CrawlError> {
        self.check_policy(url).await?;

        self.audit
            .record(&ArchiveRequest::new(url, user_id))
            .await
            .map_err(CrawlError::Intake)?;

        info!(url = %url, "Archiving");
        self.resolve_entity(url).await?;
        let (entity, links) = self.fetch_primary(url).await?;

        if let Some(discovery) = &self.discovery {
            discovery.record(&entity).await;
        }

        Ok(PrimaryCrawl { entity, links })
    }

    /// Read the URL's entity, saving a placeholder when it is unknown
    async fn resolve_entity(&self, url: &str) -> Result<UrlEntity, CrawlError> {
        match self.store.read_url(url).await {
            Ok(entity) => Ok(entity),
            Err(StoreError::NotFound) => {
                let entity = UrlEntity::placeholder(url);
                self.store
                    .save_url(&entity)
                    .await
                    .map_err(CrawlError::Resolve)?;
                Ok(entity)
            }
            Err(e) => Err(CrawlError::Resolve(e)),
        }
    }

    async fn fetch_primary(&self, url: &str) -> Result<(UrlEntity, Vec<Link>), CrawlError> {
        self.store.fetch(url).await.map_err(CrawlError::Fetch)
    }

    /// Announce the outbound links, then fetch them in the configured mode
    pub async fn report_links(
        &self,
        source: &str,
        links: Vec<Link>,
        outbox: &Outbox,
        cancel: &CancellationToken,
    ) -> Result<(), CrawlError> {
        outbox
            .send(link_array_response(&links))
            .await
            .map_err(|_| CrawlError::Cancelled)?;

        let count = links.len();
        let result = match self.config.mode {
            CrawlMode::Throttled => self.crawl_links_throttled(&links, outbox, cancel).await,
            CrawlMode::Batch => {
                let (tx, rx) = oneshot::channel();
                self.crawl_links_batch(links, Some(outbox.clone()), cancel.clone(), move |r| {
                    let _ = tx.send(r);
                });
                rx.await.unwrap_or(Err(CrawlError::Cancelled))
            }
        };

        match &result {
            Ok(()) => info!(url = %source, links = count, "Crawl completed"),
            Err(CrawlError::Cancelled) => info!(url = %source, "Crawl cancelled"),
            Err(e) => warn!(url = %source, error = %e, "Crawl completed with errors"),
        }
        result
    }

    /// Fetch links one at a time, pausing `link_delay` before each
    ///
    /// A failing link is reported and the crawl moves on.
    pub async fn crawl_links_throttled(
        &self,
        links: &[Link],
        outbox: &Outbox,
        cancel: &CancellationToken,
    ) -> Result<(), CrawlError> {
        for link in links {
            tokio::select! {
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                _ = tokio::time::sleep(self.config.link_delay) => {}
            }

            let url = link.dst.url.as_str();
            outbox
                .send(link_loading_response(url))
                .await
                .map_err(|_| CrawlError::Cancelled)?;

            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                fetched = self.store.fetch(url) => fetched,
            };

            let response = match fetched {
                Ok((entity, _)) => {
                    if let Some(discovery) = &self.discovery {
                        discovery.record(&entity).await;
                    }
                    link_success_response(url)
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Link fetch failed");
                    link_error_response(url, &e.to_string())
                }
            };
            outbox.send(response).await.map_err(|_| CrawlError::Cancelled)?;
        }
        Ok(())
    }

    /// Fetch every link concurrently
    ///
    /// Each fetch reports into a completion channel sized to the link count; an
    /// aggregator drains exactly that many completions and calls `done` once,
    /// with the first per-link error if any occurred. Per-link results are also
    /// sent to `outbox` when one is given.
    pub fn crawl_links_batch<F>(
        &self,
        links: Vec<Link>,
        outbox: Option<Outbox>,
        cancel: CancellationToken,
        done: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<(), CrawlError>) + Send + 'static,
    {
        let tasks = links.len();
        let (tx, mut rx) = mpsc::channel::<Result<(), CrawlError>>(tasks.max(1));

        for link in links {
            let tx = tx.clone();
            let store = Arc::clone(&self.store);
            let discovery = self.discovery.clone();
            let outbox = outbox.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let url = link.dst.url;
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(CrawlError::Cancelled),
                    fetched = store.fetch(&url) => match fetched {
                        Ok((entity, _)) => {
                            if let Some(discovery) = &discovery {
                                discovery.record(&entity).await;
                            }
                            Ok(())
                        }
                        Err(e) => Err(CrawlError::Fetch(e)),
                    },
                };

                match &result {
                    Ok(()) => debug!(url = %url, "Link fetched"),
                    Err(e) => warn!(url = %url, error = %e, "Link fetch failed"),
                }

                if let Some(outbox) = &outbox {
                    let response = match &result {
                        Ok(()) => Some(link_success_response(&url)),
                        Err(CrawlError::Cancelled) => None,
                        Err(e) => Some(link_error_response(&url, &e.to_string())),
                    };
                    if let Some(response) = response {
                        let _ = outbox.send(response).await;
                    }
                }

                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        tokio::spawn(async move {
            let mut first_error = None;
            for _ in 0..tasks {
                match rx.recv().await {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    None => break,
                }
            }
            done(first_error.map_or(Ok(()), Err));
        })
    }

    /// Archive a URL and every page it links to, returning once all fetches finish
    pub async fn archive_url_sync(&self, url: &str) -> Result<UrlEntity, CrawlError> {
        self.check_policy(url).await?;
        self.resolve_entity(url).await?;
        let (entity, links) = self.fetch_primary(url).await?;

        if let Some(discovery) = &self.discovery {
            discovery.record(&entity).await;
        }

        let (tx, rx) = oneshot::channel();
        self.crawl_links_batch(links, None, CancellationToken::new(), move |r| {
            let _ = tx.send(r);
        });
        rx.await.unwrap_or(Err(CrawlError::Cancelled))?;

        Ok(entity)
    }
}

fn link_array_response(links: &[Link]) -> ClientResponse {
    ClientResponse::new(FETCH_OUTBOUND_LINKS_SUCCESS, SERVER_REQUEST_ID)
        .with_schema("LINK_ARRAY")
        .with_serialized(&links)
}

fn link_loading_response(url: &str) -> ClientResponse {
    ClientResponse::new(URL_SET_LOADING, SERVER_REQUEST_ID)
        .with_data(json!({ "url": url, "loading": true }))
}

fn link_success_response(url: &str) -> ClientResponse {
    ClientResponse::new(URL_SET_SUCCESS, SERVER_REQUEST_ID)
        .with_data(json!({ "url": url, "success": true }))
}

fn link_error_response(url: &str, error: &str) -> ClientResponse {
    ClientResponse::new(URL_SET_ERROR, SERVER_REQUEST_ID)
        .with_data(json!({ "url": url, "error": error }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use crate::ledger::MemoryMetadataStore;
    use crate::server::Session;
    use crate::store::{MemoryContentStore, Page};
    use std::time::Instant;

    struct Fixture {
        orchestrator: CrawlOrchestrator,
        store: Arc<MemoryContentStore>,
        audit: Arc<MemoryArchiveLog>,
    }

    fn fixture(mode: CrawlMode, delay: Duration) -> Fixture {
        let store = Arc::new(MemoryContentStore::new());
        let audit = Arc::new(MemoryArchiveLog::new());
        let config = CrawlConfig {
            mode,
            link_delay: delay,
            ledger_key_id: None,
        };
        let orchestrator = CrawlOrchestrator::new(
            config,
            Arc::new(AllowList::new(["example.com"])),
            audit.clone(),
            store.clone(),
        );
        Fixture {
            orchestrator,
            store,
            audit,
        }
    }

    fn site(store: &MemoryContentStore) {
        store.add_page(
            "http://example.com/",
            Page::new("<html>home</html>").with_links([
                "http://example.com/a",
                "http://example.com/b",
                "http://example.com/c",
            ]),
        );
        store.add_page("http://example.com/a", Page::new("a"));
        store.add_page("http://example.com/b", Page::failing("connection reset"));
        store.add_page("http://example.com/c", Page::new("c"));
    }

    #[tokio::test]
    async fn test_policy_rejection_has_no_side_effects() {
        let f = fixture(CrawlMode::Throttled, Duration::ZERO);
        let err = f.orchestrator.archive("http://evil.test/x", "").await.unwrap_err();
        assert!(matches!(err, CrawlError::PolicyViolation(_)));
        assert!(err.client_message().contains("cannot archive http://evil.test/x"));
        assert!(f.audit.requests().is_empty());
        assert_eq!(f.store.total_fetches(), 0);
        assert!(f.store.entity("http://evil.test/x").is_none());
    }

    #[tokio::test]
    async fn test_archive_records_intake_and_saves_placeholder() {
        let f = fixture(CrawlMode::Throttled, Duration::ZERO);
        site(&f.store);
        let primary = f.orchestrator.archive("http://example.com/", "").await.unwrap();

        assert_eq!(primary.links.len(), 3);
        assert!(primary.entity.hash.starts_with("1220"));
        assert_eq!(f.audit.requests().len(), 1);
        assert_eq!(f.store.fetch_count("http://example.com/"), 1);
    }

    #[tokio::test]
    async fn test_resolve_failure_is_redacted() {
        let f = fixture(CrawlMode::Throttled, Duration::ZERO);
        site(&f.store);
        f.store.set_unavailable(true);

        let err = f.orchestrator.archive("http://example.com/", "").await.unwrap_err();
        assert!(matches!(err, CrawlError::Resolve(_)));
        assert_eq!(err.client_message(), "internal server error");
        assert_eq!(f.store.total_fetches(), 0);
    }

    #[tokio::test]
    async fn test_primary_fetch_failure_message_passes_through() {
        let f = fixture(CrawlMode::Throttled, Duration::ZERO);
        f.store.add_page("http://example.com/down", Page::failing("503 Service Unavailable"));

        let err = f.orchestrator.archive("http://example.com/down", "").await.unwrap_err();
        assert_eq!(err.client_message(), "503 Service Unavailable");
    }

    #[tokio::test]
    async fn test_throttled_crawl_reports_each_link() {
        let delay = Duration::from_millis(20);
        let f = fixture(CrawlMode::Throttled, delay);
        site(&f.store);
        let primary = f.orchestrator.archive("http://example.com/", "").await.unwrap();

        let (session, mut rx) = Session::detached(64);
        let started = Instant::now();
        f.orchestrator
            .report_links(
                "http://example.com/",
                primary.links,
                &session.outbox(),
                &session.cancellation(),
            )
            .await
            .unwrap();
        assert!(started.elapsed() >= delay * 3);

        let mut types = Vec::new();
        while let Ok(res) = rx.try_recv() {
            if res.r#type == FETCH_OUTBOUND_LINKS_SUCCESS {
                assert_eq!(res.data.as_ref().and_then(Value::as_array).map(Vec::len), Some(3));
            }
            types.push(res.r#type);
        }
        assert_eq!(
            types,
            vec![
                FETCH_OUTBOUND_LINKS_SUCCESS,
                URL_SET_LOADING,
                URL_SET_SUCCESS,
                URL_SET_LOADING,
                URL_SET_ERROR,
                URL_SET_LOADING,
                URL_SET_SUCCESS,
            ]
        );
    }

    #[tokio::test]
    async fn test_throttled_crawl_stops_when_cancelled() {
        let f = fixture(CrawlMode::Throttled, Duration::from_millis(50));
        site(&f.store);
        let primary = f.orchestrator.archive("http://example.com/", "").await.unwrap();

        let (session, _rx) = Session::detached(64);
        let cancel = session.cancellation();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            canceller.cancel();
        });

        let result = f
            .orchestrator
            .crawl_links_throttled(&primary.links, &session.outbox(), &cancel)
            .await;
        assert!(matches!(result, Err(CrawlError::Cancelled)));
        assert_eq!(f.store.fetch_count("http://example.com/a"), 1);
        assert_eq!(f.store.fetch_count("http://example.com/c"), 0);
    }

    #[tokio::test]
    async fn test_batch_crawl_reports_first_error() {
        let f = fixture(CrawlMode::Batch, Duration::from_secs(60));
        site(&f.store);
        let primary = f.orchestrator.archive("http://example.com/", "").await.unwrap();

        let (tx, rx) = oneshot::channel();
        f.orchestrator.crawl_links_batch(primary.links, None, CancellationToken::new(), move |r| {
            let _ = tx.send(r);
        });
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(CrawlError::Fetch(StoreError::Fetch(_)))));
        for link in ["a", "b", "c"] {
            assert_eq!(f.store.fetch_count(&format!("http://example.com/{}", link)), 1);
        }
    }

    #[tokio::test]
    async fn test_batch_crawl_with_no_links_completes() {
        let f = fixture(CrawlMode::Batch, Duration::ZERO);
        let (tx, rx) = oneshot::channel();
        f.orchestrator
            .crawl_links_batch(Vec::new(), None, CancellationToken::new(), move |r| {
                let _ = tx.send(r);
            })
            .await
            .unwrap();
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_batch_mode_report_links_sends_per_link_results() {
        let f = fixture(CrawlMode::Batch, Duration::from_secs(60));
        site(&f.store);
        let primary = f.orchestrator.archive("http://example.com/", "").await.unwrap();

        let (session, mut rx) = Session::detached(64);
        let result = f
            .orchestrator
            .report_links(
                "http://example.com/",
                primary.links,
                &session.outbox(),
                &session.cancellation(),
            )
            .await;
        assert!(result.is_err());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.r#type, FETCH_OUTBOUND_LINKS_SUCCESS);
        let mut successes = 0;
        let mut errors = 0;
        while let Ok(res) = rx.try_recv() {
            match res.r#type.as_str() {
                URL_SET_SUCCESS => successes += 1,
                URL_SET_ERROR => errors += 1,
                other => panic!("unexpected response {}", other),
            }
        }
        assert_eq!((successes, errors), (2, 1));
    }

    #[tokio::test]
    async fn test_archive_url_sync() {
        let f = fixture(CrawlMode::Batch, Duration::ZERO);
        f.store.add_page(
            "http://example.com/ok",
            Page::new("ok").with_links(["http://example.com/a"]),
        );
        f.store.add_page("http://example.com/a", Page::new("a"));

        let entity = f.orchestrator.archive_url_sync("http://example.com/ok").await.unwrap();
        assert_eq!(entity.url, "http://example.com/ok");
        assert_eq!(f.store.fetch_count("http://example.com/a"), 1);

        site(&f.store);
        assert!(f.orchestrator.archive_url_sync("http://example.com/").await.is_err());
    }

    #[tokio::test]
    async fn test_crawled_pages_are_recorded_in_ledger() {
        let store = Arc::new(MemoryContentStore::new());
        store.add_page(
            "http://example.com/",
            Page {
                title: "Home".to_string(),
                body: "home".to_string(),
                ..Default::default()
            },
        );
        let records = Arc::new(MemoryMetadataStore::new());
        let ledger = Arc::new(Ledger::new(records.clone(), HashAlgorithm::Sha2_256));
        let orchestrator = CrawlOrchestrator::new(
            CrawlConfig {
                ledger_key_id: Some("crawler".to_string()),
                ..Default::default()
            },
            Arc::new(AllowList::new(["example.com"])),
            Arc::new(MemoryArchiveLog::new()),
            store,
        )
        .with_ledger(ledger);

        let primary = orchestrator.archive("http://example.com/", "").await.unwrap();
        let stored = records.records();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key_id, "crawler");
        assert_eq!(stored[0].subject, primary.entity.hash);
        assert_eq!(stored[0].title(), Some("Home"));
    }
}
