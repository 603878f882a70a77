//! Metadata ledger handlers
//!
//! - `METADATA_SAVE_REQUEST` extends a (keyId, subject) chain with a new payload
//! - `METADATA_FOR_SUBJECT_REQUEST` lists every record describing a subject

use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::error;

use super::envelope::{
    ClientResponse, METADATA_FOR_SUBJECT_ERROR, METADATA_FOR_SUBJECT_REQUEST,
    METADATA_FOR_SUBJECT_SUCCESS, METADATA_SAVE_ERROR, METADATA_SAVE_REQUEST,
    METADATA_SAVE_SUCCESS,
};
use super::{parse_data, ActionReply, ActionRequest, RequestAction};
use crate::ledger::{Ledger, LedgerError};
use crate::server::Session;

fn client_message(e: &LedgerError) -> String {
    match e {
        LedgerError::Integrity { .. } => "metadata chain failed integrity check".to_string(),
        _ => "internal server error".to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SaveMetadataData {
    #[serde(alias = "keyId")]
    key_id: String,
    #[serde(alias = "subject")]
    subject: String,
    #[serde(default, alias = "meta")]
    meta: Map<String, Value>,
}

/// Appends a record to a metadata chain
pub struct SaveMetadataAction {
    ledger: Arc<Ledger>,
}

impl SaveMetadataAction {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

impl RequestAction for SaveMetadataAction {
    fn action_type(&self) -> &str {
        METADATA_SAVE_REQUEST
    }

    fn parse(
        &self,
        request_id: &str,
        data: Value,
    ) -> Result<Box<dyn ActionRequest>, serde_json::Error> {
        let data: SaveMetadataData = parse_data(data)?;
        Ok(Box::new(SaveMetadataRequest {
            request_id: request_id.to_string(),
            data,
            ledger: Arc::clone(&self.ledger),
        }))
    }
}

struct SaveMetadataRequest {
    request_id: String,
    data: SaveMetadataData,
    ledger: Arc<Ledger>,
}

#[async_trait::async_trait]
impl ActionRequest for SaveMetadataRequest {
    async fn exec(&self, _session: &Session) -> ActionReply {
        let SaveMetadataData {
            key_id,
            subject,
            meta,
        } = &self.data;

        if key_id.is_empty() || subject.is_empty() {
            return ActionReply::new(ClientResponse::error(
                METADATA_SAVE_ERROR,
                self.request_id.clone(),
                "keyId and subject are required",
            ));
        }

        let response = match self.ledger.append(key_id, subject, meta.clone()).await {
            Ok(record) => ClientResponse::new(METADATA_SAVE_SUCCESS, self.request_id.clone())
                .with_schema("METADATA")
                .with_serialized(&record),
            Err(e) => {
                error!(
                    request_id = %self.request_id,
                    key_id = %key_id,
                    subject = %subject,
                    error = %e,
                    "Metadata save failed"
                );
                ClientResponse::error(
                    METADATA_SAVE_ERROR,
                    self.request_id.clone(),
                    client_message(&e),
                )
            }
        };
        ActionReply::new(response)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataForSubjectData {
    #[serde(alias = "subject")]
    subject: String,
}

/// Lists the metadata records describing a subject
pub struct MetadataForSubjectAction {
    ledger: Arc<Ledger>,
}

impl MetadataForSubjectAction {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

impl RequestAction for MetadataForSubjectAction {
    fn action_type(&self) -> &str {
        METADATA_FOR_SUBJECT_REQUEST
    }

    fn parse(
        &self,
        request_id: &str,
        data: Value,
    ) -> Result<Box<dyn ActionRequest>, serde_json::Error> {
        let data: MetadataForSubjectData = parse_data(data)?;
        Ok(Box::new(MetadataForSubjectRequest {
            request_id: request_id.to_string(),
            subject: data.subject,
            ledger: Arc::clone(&self.ledger),
        }))
    }
}

struct MetadataForSubjectRequest {
    request_id: String,
    subject: String,
    ledger: Arc<Ledger>,
}

#[async_trait::async_trait]
impl ActionRequest for MetadataForSubjectRequest {
    async fn exec(&self, _session: &Session) -> ActionReply {
        let response = match self.ledger.for_subject(&self.subject).await {
            Ok(records) => {
                ClientResponse::new(METADATA_FOR_SUBJECT_SUCCESS, self.request_id.clone())
                    .with_schema("METADATA_ARRAY")
                    .with_serialized(&records)
            }
            Err(e) => {
                error!(
                    request_id = %self.request_id,
                    subject = %self.subject,
                    error = %e,
                    "Metadata lookup failed"
                );
                ClientResponse::error(
                    METADATA_FOR_SUBJECT_ERROR,
                    self.request_id.clone(),
                    client_message(&e),
                )
            }
        };
        ActionReply::new(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::hash::HashAlgorithm;
    use crate::ledger::MemoryMetadataStore;

    fn registry() -> (ActionRegistry, Arc<MemoryMetadataStore>) {
        let store = Arc::new(MemoryMetadataStore::new());
        let ledger = Arc::new(Ledger::new(store.clone(), HashAlgorithm::Sha2_256));
        let registry = ActionRegistry::new()
            .with(SaveMetadataAction::new(Arc::clone(&ledger)))
            .with(MetadataForSubjectAction::new(ledger));
        (registry, store)
    }

    #[tokio::test]
    async fn test_save_extends_chain() {
        let (registry, store) = registry();
        let (session, mut rx) = Session::detached(8);

        for title in ["One", "Two"] {
            let raw = format!(
                r#"{{"Type":"METADATA_SAVE_REQUEST","RequestId":"r1","Data":{{"KeyId":"alice","Subject":"1220ab","Meta":{{"title":"{}"}}}}}}"#,
                title
            );
            registry.dispatch(raw.as_bytes(), &session).await;
            let res = rx.recv().await.unwrap();
            assert_eq!(res.r#type, METADATA_SAVE_SUCCESS);
            assert_eq!(res.schema.as_deref(), Some("METADATA"));
        }

        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].prev, records[0].hash());
        assert_eq!(records[1].title(), Some("Two"));
    }

    #[tokio::test]
    async fn test_save_requires_key_and_subject() {
        let (registry, store) = registry();
        let (session, mut rx) = Session::detached(8);
        registry
            .dispatch(
                br#"{"Type":"METADATA_SAVE_REQUEST","RequestId":"r1","Data":{"KeyId":"","Subject":"s"}}"#,
                &session,
            )
            .await;

        let res = rx.recv().await.unwrap();
        assert_eq!(res.r#type, METADATA_SAVE_ERROR);
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_for_subject() {
        let (registry, _) = registry();
        let (session, mut rx) = Session::detached(8);
        for key in ["alice", "bob"] {
            let raw = format!(
                r#"{{"Type":"METADATA_SAVE_REQUEST","RequestId":"w","Data":{{"keyId":"{}","subject":"1220ab"}}}}"#,
                key
            );
            registry.dispatch(raw.as_bytes(), &session).await;
            rx.recv().await.unwrap();
        }

        registry
            .dispatch(
                br#"{"Type":"METADATA_FOR_SUBJECT_REQUEST","RequestId":"r2","Data":{"Subject":"1220ab"}}"#,
                &session,
            )
            .await;
        let res = rx.recv().await.unwrap();
        assert_eq!(res.r#type, METADATA_FOR_SUBJECT_SUCCESS);
        assert_eq!(res.request_id, "r2");
        assert_eq!(res.schema.as_deref(), Some("METADATA_ARRAY"));
        let records = res.data.unwrap();
        assert_eq!(records.as_array().unwrap().len(), 2);
        assert_eq!(records[0]["subject"], "1220ab");
    }
}
