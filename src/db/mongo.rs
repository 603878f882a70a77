//! MongoDB client and collection wrapper

use bson::{doc, oid::ObjectId, DateTime, Document};
use futures_util::StreamExt;
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::db::schemas::DocMeta;
use crate::types::ArchwayError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable bookkeeping fields
pub trait MutDocMeta {
    fn mut_doc_meta(&mut self) -> &mut DocMeta;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the connection with a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, ArchwayError> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast on an unreachable server instead of hanging at startup
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| ArchwayError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ArchwayError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection, creating its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, ArchwayError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutDocMeta,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with soft-delete aware reads
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutDocMeta,
{
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, ArchwayError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };
        mongo_collection.apply_indexes().await?;
        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<(), ArchwayError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| ArchwayError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, stamping its bookkeeping fields
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId, ArchwayError> {
        let meta = item.mut_doc_meta();
        meta.is_deleted = false;
        meta.created_at = Some(DateTime::now());
        meta.updated_at = Some(DateTime::now());

        let result = self
            .inner
            .insert_one(item)
            .await
            .map_err(|e| ArchwayError::Database(format!("Insert failed: {}", e)))?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| ArchwayError::Database("Failed to get inserted ID".into()))
    }

    /// First live document matching `filter` in `sort` order
    pub async fn find_one(
        &self,
        filter: Document,
        sort: Option<Document>,
    ) -> Result<Option<T>, ArchwayError> {
        let mut action = self.inner.find_one(live(filter));
        if let Some(sort) = sort {
            action = action.sort(sort);
        }
        action
            .await
            .map_err(|e| ArchwayError::Database(format!("Find failed: {}", e)))
    }

    /// Every live document matching `filter` in `sort` order
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Option<Document>,
    ) -> Result<Vec<T>, ArchwayError> {
        let mut action = self.inner.find(live(filter));
        if let Some(sort) = sort {
            action = action.sort(sort);
        }
        let cursor = action
            .await
            .map_err(|e| ArchwayError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }
}

fn live(mut filter: Document) -> Document {
    filter.insert("doc_meta.is_deleted", doc! { "$ne": true });
    filter
}
