//! Metadata ledger
//!
//! Append-only, hash-linked chains of metadata records, one chain per
//! (key_id, subject) pair. A chain's head is its most recent record; each new
//! record points at the head it extends through `prev`.
//!
//! ## Write path
//!
//! `write` stamps the record, seals its hash and appends it exactly once. There
//! is no update-in-place: a change is a new record.
//!
//! When the payload carries a non-empty `title`, the subject's entity in the
//! content store is retitled in a detached task. That projection is best effort:
//! failures are logged and never reach the writer, and readers of the content
//! store may observe the old title until the task finishes.
//!
//! ## Concurrency
//!
//! `next_record` followed by `write` can fork a chain when two writers race on
//! the same head. `append` serializes those two steps per chain key inside this
//! process and is what request handlers use.

mod record;
mod store;

pub use record::MetadataRecord;
pub use store::{MemoryMetadataStore, MetadataStore};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::hash::HashAlgorithm;
use crate::store::ContentStore;

/// Error type for ledger operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// No record exists for the requested chain
    #[error("not found")]
    NotFound,

    #[error("metadata storage error: {0}")]
    Storage(String),

    /// Stored hash does not match the record contents
    #[error("chain integrity error: stored hash {expected}, computed {actual}")]
    Integrity { expected: String, actual: String },

    #[error("metadata serialization error: {0}")]
    Serialization(String),
}

type ChainKey = (String, String);

/// Ledger of metadata chains
pub struct Ledger {
    store: Arc<dyn MetadataStore>,
    content: Option<Arc<dyn ContentStore>>,
    algorithm: HashAlgorithm,
    chain_locks: DashMap<ChainKey, Arc<Mutex<()>>>,
}

impl Ledger {
    /// Create a ledger over a metadata store
    pub fn new(store: Arc<dyn MetadataStore>, algorithm: HashAlgorithm) -> Self {
        Self {
            store,
            content: None,
            algorithm,
            chain_locks: DashMap::new(),
        }
    }

    /// Enable title projection onto the content store
    pub fn with_content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Most recent record of a chain
    ///
    /// Returns `LedgerError::NotFound` when the chain is empty, and
    /// `LedgerError::Integrity` when the stored head does not hash to itself
    /// under the algorithm its own hash names.
    pub async fn chain_head(
        &self,
        key_id: &str,
        subject: &str,
    ) -> Result<MetadataRecord, LedgerError> {
        let head = self
            .store
            .latest(key_id, subject)
            .await?
            .ok_or(LedgerError::NotFound)?;
        head.verify()?;
        Ok(head)
    }

    /// Unsealed successor of a chain's head
    ///
    /// For an empty chain this is a fresh record with empty `prev` and payload.
    /// Otherwise it carries the head's key, subject and payload, with `prev` set
    /// to the head's hash. Callers replace `meta` before writing.
    pub async fn next_record(
        &self,
        key_id: &str,
        subject: &str,
    ) -> Result<MetadataRecord, LedgerError> {
        match self.chain_head(key_id, subject).await {
            Ok(head) => Ok(MetadataRecord {
                key_id: head.key_id,
                subject: head.subject,
                prev: head.hash,
                meta: head.meta,
                ..Default::default()
            }),
            Err(LedgerError::NotFound) => Ok(MetadataRecord::new(key_id, subject)),
            Err(e) => Err(e),
        }
    }

    /// Seal and append a record, stamped with the current time
    pub async fn write(&self, record: &mut MetadataRecord) -> Result<(), LedgerError> {
        self.write_at(record, Utc::now()).await
    }

    /// Seal and append a record, stamped with `now`
    pub async fn write_at(
        &self,
        record: &mut MetadataRecord,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        record.seal(now, self.algorithm);
        self.store.insert(record).await?;
        info!(record = %record, "Metadata written");

        if let Some(title) = record.title() {
            self.project_title(record.subject.clone(), title.to_string());
        }
        Ok(())
    }

    /// Extend a chain with a new payload, serialized against other appends to
    /// the same chain
    pub async fn append(
        &self,
        key_id: &str,
        subject: &str,
        meta: Map<String, Value>,
    ) -> Result<MetadataRecord, LedgerError> {
        let key = (key_id.to_string(), subject.to_string());
        let lock = self.chain_lock(&key);

        let result = {
            let _guard = lock.lock().await;
            self.append_locked(key_id, subject, meta).await
        };

        // Drop the lock entry once no other append holds or waits on it
        drop(lock);
        self.chain_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn append_locked(
        &self,
        key_id: &str,
        subject: &str,
        meta: Map<String, Value>,
    ) -> Result<MetadataRecord, LedgerError> {
        let mut record = self.next_record(key_id, subject).await?;
        record.meta = meta;
        self.write(&mut record).await?;
        Ok(record)
    }

    /// Every record describing a subject
    pub async fn for_subject(&self, subject: &str) -> Result<Vec<MetadataRecord>, LedgerError> {
        self.store.for_subject(subject).await
    }

    fn chain_lock(&self, key: &ChainKey) -> Arc<Mutex<()>> {
        Arc::clone(
            self.chain_locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn project_title(&self, subject: String, title: String) {
        let Some(content) = self.content.clone() else {
            return;
        };

        tokio::spawn(async move {
            let mut entity = match content.read_by_hash(&subject).await {
                Ok(entity) => entity,
                Err(e) => {
                    warn!(subject = %subject, error = %e, "Title projection: subject read failed");
                    return;
                }
            };

            entity.title = title;
            if let Err(e) = content.update(&entity).await {
                warn!(subject = %subject, error = %e, "Title projection: update failed");
                return;
            }
            debug!(subject = %subject, url = %entity.url, "Title projected");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryContentStore, Page};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    fn ledger() -> (Ledger, Arc<MemoryMetadataStore>) {
        let store = Arc::new(MemoryMetadataStore::new());
        (
            Ledger::new(store.clone(), HashAlgorithm::Sha2_256),
            store,
        )
    }

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_chain_head_not_found() {
        let (ledger, _) = ledger();
        assert_eq!(
            ledger.chain_head("key", "subject").await,
            Err(LedgerError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_next_record_for_empty_chain() {
        let (ledger, _) = ledger();
        let record = ledger.next_record("key", "subject").await.unwrap();
        assert_eq!(record.prev, "");
        assert!(record.meta.is_empty());
        assert_eq!(record.key_id, "key");
        assert_eq!(record.subject, "subject");
        assert_eq!(record.hash(), "");
    }

    #[tokio::test]
    async fn test_next_record_links_to_head() {
        let (ledger, _) = ledger();
        let mut first = ledger.next_record("key", "subject").await.unwrap();
        first.meta = meta(json!({"title": "One"}));
        ledger.write(&mut first).await.unwrap();

        let next = ledger.next_record("key", "subject").await.unwrap();
        assert_eq!(next.prev, first.hash());
        assert_eq!(next.meta, first.meta);
        assert_eq!(next.hash(), "");
    }

    #[tokio::test]
    async fn test_write_is_deterministic_for_same_time() {
        let now = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let (ledger_a, _) = ledger();
        let (ledger_b, _) = ledger();

        let mut a = MetadataRecord::new("key", "subject");
        a.meta = meta(json!({"b": 2, "a": 1}));
        let mut b = MetadataRecord::new("key", "subject");
        b.meta = meta(json!({"a": 1, "b": 2}));

        ledger_a.write_at(&mut a, now).await.unwrap();
        ledger_b.write_at(&mut b, now).await.unwrap();
        assert_eq!(a.hash(), b.hash());

        let mut c = MetadataRecord::new("key", "subject");
        c.meta = meta(json!({"a": 1, "b": 3}));
        ledger_b.write_at(&mut c, now).await.unwrap();
        assert_ne!(a.hash(), c.hash());
    }

    #[tokio::test]
    async fn test_write_appends_exactly_once() {
        let now = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let (ledger, store) = ledger();
        let mut record = MetadataRecord::new("key", "subject");
        ledger.write_at(&mut record, now).await.unwrap();

        let mut duplicate = record.clone();
        let err = ledger.write_at(&mut duplicate, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_chain_head_detects_tampered_record() {
        let (ledger, store) = ledger();
        let mut record = MetadataRecord::new("key", "subject");
        record.seal(Utc::now(), HashAlgorithm::Sha2_256);
        record.meta.insert("title".into(), json!("Forged"));
        store.insert(&record).await.unwrap();

        let err = ledger.chain_head("key", "subject").await.unwrap_err();
        assert!(matches!(err, LedgerError::Integrity { .. }));
        assert!(ledger.next_record("key", "subject").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_appends_form_a_single_chain() {
        let (ledger, store) = ledger();
        let ledger = Arc::new(ledger);

        let mut tasks = Vec::new();
        for i in 0..10 {
            let ledger = Arc::clone(&ledger);
            tasks.push(tokio::spawn(async move {
                ledger
                    .append("key", "subject", meta(json!({ "n": i })))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let records = store.records();
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].prev, "");
        for pair in records.windows(2) {
            assert_eq!(pair[1].prev, pair[0].hash());
        }
        assert!(ledger.chain_locks.is_empty());
    }

    #[tokio::test]
    async fn test_chain_locks_released_after_append() {
        let (sequential, _) = ledger();
        for i in 0..100 {
            sequential
                .append("key", &format!("subject-{}", i), Map::new())
                .await
                .unwrap();
        }
        assert!(sequential.chain_locks.is_empty());

        // A failed append releases its entry too
        let (failing, store) = ledger();
        let mut forged = MetadataRecord::new("key", "subject");
        forged.seal(Utc::now(), HashAlgorithm::Sha2_256);
        forged.prev = "1220ff".to_string();
        store.insert(&forged).await.unwrap();
        assert!(failing.append("key", "subject", Map::new()).await.is_err());
        assert!(failing.chain_locks.is_empty());
    }

    #[tokio::test]
    async fn test_chain_survives_algorithm_change() {
        let store = Arc::new(MemoryMetadataStore::new());
        let old = Ledger::new(store.clone(), HashAlgorithm::Sha2_256);
        let first = old
            .append("key", "subject", meta(json!({"title": "One"})))
            .await
            .unwrap();
        assert!(first.hash().starts_with("1220"));

        let new = Ledger::new(store.clone(), HashAlgorithm::Sha2_512);
        assert_eq!(new.chain_head("key", "subject").await.unwrap(), first);

        let second = new
            .append("key", "subject", meta(json!({"title": "Two"})))
            .await
            .unwrap();
        assert!(second.hash().starts_with("1340"));
        assert_eq!(second.prev, first.hash());
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test]
    async fn test_title_projection_updates_subject() {
        let content = Arc::new(MemoryContentStore::new());
        content.add_page("http://example.com", Page::new("<html>body</html>"));
        let (entity, _) = content.fetch("http://example.com").await.unwrap();

        let store = Arc::new(MemoryMetadataStore::new());
        let ledger = Ledger::new(store, HashAlgorithm::Sha2_256)
            .with_content_store(content.clone());

        ledger
            .append("key", &entity.hash, meta(json!({"title": "Projected"})))
            .await
            .unwrap();

        let mut projected = false;
        for _ in 0..50 {
            if content.entity("http://example.com").unwrap().title == "Projected" {
                projected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(projected);
    }

    #[tokio::test]
    async fn test_title_projection_failure_does_not_fail_write() {
        let content = Arc::new(MemoryContentStore::new());
        let store = Arc::new(MemoryMetadataStore::new());
        let ledger = Ledger::new(store.clone(), HashAlgorithm::Sha2_256)
            .with_content_store(content);

        let record = ledger
            .append("key", "1220unknown", meta(json!({"title": "Orphan"})))
            .await
            .unwrap();
        assert!(record.hash().starts_with("1220"));
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_for_subject_spans_signers() {
        let (ledger, _) = ledger();
        ledger.append("alice", "subject", Map::new()).await.unwrap();
        ledger.append("bob", "subject", Map::new()).await.unwrap();
        ledger.append("bob", "other", Map::new()).await.unwrap();

        let records = ledger.for_subject("subject").await.unwrap();
        assert_eq!(records.len(), 2);
    }
}
