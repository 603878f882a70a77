//! Subprimer document
//!
//! Each subprimer contributes one URL pattern to the archiving allow-list.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutDocMeta};
use crate::db::schemas::DocMeta;

/// Collection name for subprimers
pub const SUBPRIMER_COLLECTION: &str = "subprimers";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SubprimerDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub doc_meta: DocMeta,

    /// Pattern a URL must contain to be archived
    pub url: String,
}

impl IntoIndexes for SubprimerDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "url": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("url_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutDocMeta for SubprimerDoc {
    fn mut_doc_meta(&mut self) -> &mut DocMeta {
        &mut self.doc_meta
    }
}
