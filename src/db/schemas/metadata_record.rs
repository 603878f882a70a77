//! Metadata record document
//!
//! The payload is stored as JSON text so that key order and number formatting
//! round-trip exactly; the record hash is computed over that payload.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::mongo::{IntoIndexes, MutDocMeta};
use crate::db::schemas::DocMeta;
use crate::ledger::{LedgerError, MetadataRecord};

/// Collection name for metadata records
pub const METADATA_COLLECTION: &str = "metadata";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MetadataDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub doc_meta: DocMeta,

    /// Record content identifier
    pub hash: String,

    pub time_stamp: DateTime,

    pub key_id: String,

    pub subject: String,

    #[serde(default)]
    pub prev: String,

    /// Payload as JSON text
    #[serde(default)]
    pub meta: String,
}

impl TryFrom<&MetadataRecord> for MetadataDoc {
    type Error = LedgerError;

    fn try_from(record: &MetadataRecord) -> Result<Self, Self::Error> {
        let meta = serde_json::to_string(&record.meta)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(Self {
            _id: None,
            doc_meta: DocMeta::new(),
            hash: record.hash().to_string(),
            time_stamp: DateTime::from_chrono(record.timestamp),
            key_id: record.key_id.clone(),
            subject: record.subject.clone(),
            prev: record.prev.clone(),
            meta,
        })
    }
}

impl TryFrom<MetadataDoc> for MetadataRecord {
    type Error = LedgerError;

    fn try_from(doc: MetadataDoc) -> Result<Self, Self::Error> {
        let meta = if doc.meta.is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(&doc.meta)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?
            {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => {
                    return Err(LedgerError::Serialization(format!(
                        "record {} payload is not an object: {}",
                        doc.hash, other
                    )))
                }
            }
        };

        Ok(Self {
            hash: doc.hash,
            timestamp: doc.time_stamp.to_chrono(),
            key_id: doc.key_id,
            subject: doc.subject,
            prev: doc.prev,
            meta,
        })
    }
}

impl IntoIndexes for MetadataDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // A record is appended exactly once
            (
                doc! { "hash": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("hash_unique".to_string())
                        .build(),
                ),
            ),
            // Chain head lookup
            (
                doc! { "key_id": 1, "subject": 1, "time_stamp": -1 },
                Some(
                    IndexOptions::builder()
                        .name("chain_head_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "subject": 1 },
                Some(
                    IndexOptions::builder()
                        .name("subject_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutDocMeta for MetadataDoc {
    fn mut_doc_meta(&mut self) -> &mut DocMeta {
        &mut self.doc_meta
    }
}
