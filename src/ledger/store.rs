//! Persistence boundary for metadata records
//!
//! Stores are append-only: there is no update path. The MongoDB-backed store
//! lives in `db::ledger`; the in-memory store here backs dev mode and tests.

use std::sync::Mutex;

use super::{LedgerError, MetadataRecord};

/// Append-only storage of metadata records
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Most recent record for a (key_id, subject) pair
    ///
    /// "Most recent" is the newest timestamp; records sharing a timestamp are
    /// ordered by insertion.
    async fn latest(
        &self,
        key_id: &str,
        subject: &str,
    ) -> Result<Option<MetadataRecord>, LedgerError>;

    /// Append a sealed record
    async fn insert(&self, record: &MetadataRecord) -> Result<(), LedgerError>;

    /// Every non-deleted record describing a subject, in insertion order
    async fn for_subject(&self, subject: &str) -> Result<Vec<MetadataRecord>, LedgerError>;
}

/// Metadata store held in process memory
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: Mutex<Vec<MetadataRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, in insertion order
    pub fn records(&self) -> Vec<MetadataRecord> {
        self.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<MetadataRecord>>, LedgerError> {
        self.records
            .lock()
            .map_err(|_| LedgerError::Storage("metadata store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn latest(
        &self,
        key_id: &str,
        subject: &str,
    ) -> Result<Option<MetadataRecord>, LedgerError> {
        let records = self.lock()?;
        // max_by_key keeps the last maximum, so later inserts win timestamp ties
        Ok(records
            .iter()
            .filter(|r| r.key_id == key_id && r.subject == subject)
            .max_by_key(|r| r.timestamp)
            .cloned())
    }

    async fn insert(&self, record: &MetadataRecord) -> Result<(), LedgerError> {
        let mut records = self.lock()?;
        if records.iter().any(|r| r.hash == record.hash) {
            return Err(LedgerError::Storage(format!(
                "duplicate metadata hash: {}",
                record.hash
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn for_subject(&self, subject: &str) -> Result<Vec<MetadataRecord>, LedgerError> {
        let records = self.lock()?;
        Ok(records
            .iter()
            .filter(|r| r.subject == subject)
            .cloned()
            .collect())
    }
}
