//! MongoDB-backed archiving policy and request log

use bson::doc;

use crate::crawl::policy::matches_any;
use crate::crawl::{ArchiveRequest, ArchiveRequestLog, UrlPolicy};
use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    ArchiveRequestDoc, SubprimerDoc, ARCHIVE_REQUEST_COLLECTION, SUBPRIMER_COLLECTION,
};
use crate::store::StoreError;
use crate::types::ArchwayError;

fn backend(err: ArchwayError) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Allow-list read from the `subprimers` collection on every check
pub struct SubprimerPolicy {
    collection: MongoCollection<SubprimerDoc>,
}

impl SubprimerPolicy {
    pub async fn new(client: &MongoClient) -> Result<Self, ArchwayError> {
        Ok(Self {
            collection: client.collection(SUBPRIMER_COLLECTION).await?,
        })
    }
}

#[async_trait::async_trait]
impl UrlPolicy for SubprimerPolicy {
    async fn allows(&self, url: &str) -> Result<bool, StoreError> {
        let subprimers = self
            .collection
            .find_many(doc! {}, None)
            .await
            .map_err(backend)?;
        Ok(matches_any(url, subprimers.iter().map(|s| s.url.as_str())))
    }
}

/// Archive requests in the `archive_requests` collection
pub struct MongoArchiveLog {
    collection: MongoCollection<ArchiveRequestDoc>,
}

impl MongoArchiveLog {
    pub async fn new(client: &MongoClient) -> Result<Self, ArchwayError> {
        Ok(Self {
            collection: client.collection(ARCHIVE_REQUEST_COLLECTION).await?,
        })
    }
}

#[async_trait::async_trait]
impl ArchiveRequestLog for MongoArchiveLog {
    async fn record(&self, request: &ArchiveRequest) -> Result<(), StoreError> {
        self.collection
            .insert_one(ArchiveRequestDoc::from(request))
            .await
            .map_err(backend)?;
        Ok(())
    }
}
