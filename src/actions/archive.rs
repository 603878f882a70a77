//! `URL_ARCHIVE_REQUEST` handler

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use super::envelope::{
    ClientResponse, URL_ARCHIVE_ERROR, URL_ARCHIVE_REQUEST, URL_ARCHIVE_SUCCESS,
};
use super::{parse_data, ActionReply, ActionRequest, RequestAction};
use crate::crawl::{CrawlError, CrawlOrchestrator, PrimaryCrawl};
use crate::server::Session;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ArchiveUrlData {
    #[serde(alias = "url")]
    url: String,
}

/// Archives a URL, then crawls the pages it links to
pub struct ArchiveUrlAction {
    orchestrator: Arc<CrawlOrchestrator>,
}

impl ArchiveUrlAction {
    pub fn new(orchestrator: Arc<CrawlOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

impl RequestAction for ArchiveUrlAction {
    fn action_type(&self) -> &str {
        URL_ARCHIVE_REQUEST
    }

    fn parse(
        &self,
        request_id: &str,
        data: Value,
    ) -> Result<Box<dyn ActionRequest>, serde_json::Error> {
        let data: ArchiveUrlData = parse_data(data)?;
        Ok(Box::new(ArchiveUrlRequest {
            request_id: request_id.to_string(),
            url: data.url,
            orchestrator: Arc::clone(&self.orchestrator),
        }))
    }
}

struct ArchiveUrlRequest {
    request_id: String,
    url: String,
    orchestrator: Arc<CrawlOrchestrator>,
}

#[async_trait::async_trait]
impl ActionRequest for ArchiveUrlRequest {
    async fn exec(&self, session: &Session) -> ActionReply {
        let PrimaryCrawl { entity, links } = match self.orchestrator.archive(&self.url, "").await {
            Ok(primary) => primary,
            Err(e) => {
                match &e {
                    CrawlError::PolicyViolation(_) => {
                        info!(
                            request_id = %self.request_id,
                            url = %self.url,
                            "Archive rejected by policy"
                        )
                    }
                    _ => {
                        error!(
                            request_id = %self.request_id,
                            url = %self.url,
                            error = %e,
                            "Archive failed"
                        )
                    }
                }
                return ActionReply::new(ClientResponse::error(
                    URL_ARCHIVE_ERROR,
                    self.request_id.clone(),
                    e.client_message(),
                ));
            }
        };

        let response = ClientResponse::new(URL_ARCHIVE_SUCCESS, self.request_id.clone())
            .with_schema("URL")
            .with_serialized(&entity);

        let orchestrator = Arc::clone(&self.orchestrator);
        let outbox = session.outbox();
        let cancel = session.cancellation();
        ActionReply::new(response).then(async move {
            let _ = orchestrator
                .report_links(&entity.url, links, &outbox, &cancel)
                .await;
        })
    }
}
