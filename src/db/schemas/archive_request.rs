//! Archive request audit document

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::crawl::ArchiveRequest;
use crate::db::mongo::{IntoIndexes, MutDocMeta};
use crate::db::schemas::DocMeta;

/// Collection name for archive requests
pub const ARCHIVE_REQUEST_COLLECTION: &str = "archive_requests";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ArchiveRequestDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub doc_meta: DocMeta,

    pub created: DateTime,

    pub url: String,

    /// Requesting user, empty for anonymous requests
    #[serde(default)]
    pub user_id: String,
}

impl From<&ArchiveRequest> for ArchiveRequestDoc {
    fn from(request: &ArchiveRequest) -> Self {
        Self {
            _id: None,
            doc_meta: DocMeta::new(),
            created: DateTime::from_chrono(request.created),
            url: request.url.clone(),
            user_id: request.user_id.clone(),
        }
    }
}

impl IntoIndexes for ArchiveRequestDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "url": 1, "created": -1 },
            Some(
                IndexOptions::builder()
                    .name("url_created_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutDocMeta for ArchiveRequestDoc {
    fn mut_doc_meta(&mut self) -> &mut DocMeta {
        &mut self.doc_meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_from_request() {
        let request = ArchiveRequest::new("http://example.com/", "");
        let doc = ArchiveRequestDoc::from(&request);
        assert!(doc._id.is_none());
        assert_eq!(doc.created.to_chrono(), request.created);
        assert_eq!(doc.url, "http://example.com/");
        assert_eq!(doc.user_id, "");

        let stored = bson::to_document(&doc).unwrap();
        assert!(stored.get_datetime("created").is_ok());
        assert!(!stored.contains_key("_id"));
    }
}
