//! MongoDB persistence
//!
//! Collections:
//! - `metadata`: ledger records (`MongoMetadataStore`)
//! - `archive_requests`: archive audit log (`MongoArchiveLog`)
//! - `subprimers`: archiving allow-list (`SubprimerPolicy`)

pub mod crawl;
pub mod ledger;
pub mod mongo;
pub mod schemas;

pub use crawl::{MongoArchiveLog, SubprimerPolicy};
pub use ledger::MongoMetadataStore;
pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutDocMeta};
