//! MongoDB-backed metadata store

use bson::doc;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{MetadataDoc, METADATA_COLLECTION};
use crate::ledger::{LedgerError, MetadataRecord, MetadataStore};
use crate::types::ArchwayError;

/// Metadata records in the `metadata` collection
pub struct MongoMetadataStore {
    collection: MongoCollection<MetadataDoc>,
}

impl MongoMetadataStore {
    pub async fn new(client: &MongoClient) -> Result<Self, ArchwayError> {
        Ok(Self {
            collection: client.collection(METADATA_COLLECTION).await?,
        })
    }
}

fn storage(err: ArchwayError) -> LedgerError {
    LedgerError::Storage(err.to_string())
}

#[async_trait::async_trait]
impl MetadataStore for MongoMetadataStore {
    async fn latest(
        &self,
        key_id: &str,
        subject: &str,
    ) -> Result<Option<MetadataRecord>, LedgerError> {
        // ObjectIds grow with insertion, so _id breaks timestamp ties
        self.collection
            .find_one(
                doc! { "key_id": key_id, "subject": subject },
                Some(doc! { "time_stamp": -1, "_id": -1 }),
            )
            .await
            .map_err(storage)?
            .map(MetadataRecord::try_from)
            .transpose()
    }

    async fn insert(&self, record: &MetadataRecord) -> Result<(), LedgerError> {
        let doc = MetadataDoc::try_from(record)?;
        self.collection.insert_one(doc).await.map_err(storage)?;
        Ok(())
    }

    async fn for_subject(&self, subject: &str) -> Result<Vec<MetadataRecord>, LedgerError> {
        self.collection
            .find_many(
                doc! { "subject": subject },
                Some(doc! { "time_stamp": 1, "_id": 1 }),
            )
            .await
            .map_err(storage)?
            .into_iter()
            .map(MetadataRecord::try_from)
            .collect()
    }
}
