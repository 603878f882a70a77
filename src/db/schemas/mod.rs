//! MongoDB document schemas

mod archive_request;
mod doc_meta;
mod metadata_record;
mod subprimer;

pub use archive_request::{ArchiveRequestDoc, ARCHIVE_REQUEST_COLLECTION};
pub use doc_meta::DocMeta;
pub use metadata_record::{MetadataDoc, METADATA_COLLECTION};
pub use subprimer::{SubprimerDoc, SUBPRIMER_COLLECTION};
