//! Bookkeeping fields shared by every document
//!
//! Tracks creation, update, and soft deletion timestamps.

use bson::DateTime;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DocMeta {
    /// Whether this document has been soft-deleted
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl DocMeta {
    /// Bookkeeping for a document created now
    pub fn new() -> Self {
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(DateTime::now()),
            created_at: Some(DateTime::now()),
        }
    }
}
