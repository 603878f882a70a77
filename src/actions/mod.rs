//! Action registry and dispatch
//!
//! Every inbound message is an `ActionEnvelope`. Only envelope types ending in
//! `REQUEST` reach handlers; any other type is logged and dropped, so send-only
//! event types can share the wire format.
//!
//! A registered `RequestAction` parses the envelope payload into an
//! `ActionRequest`, which executes into an `ActionReply`. The reply's response
//! is enqueued before its follow-up work (if any) is started, so a follow-up's
//! messages always arrive after the response they follow.

pub mod archive;
pub mod envelope;
pub mod metadata;

pub use archive::ArchiveUrlAction;
pub use envelope::{ActionEnvelope, ClientResponse};
pub use metadata::{MetadataForSubjectAction, SaveMetadataAction};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::server::Session;

/// An executable, parsed request
#[async_trait::async_trait]
pub trait ActionRequest: Send + Sync {
    async fn exec(&self, session: &Session) -> ActionReply;
}

/// Handler entry for one request type
pub trait RequestAction: Send + Sync {
    /// Envelope type this action handles
    fn action_type(&self) -> &str;

    /// Parse a raw payload into a typed request
    fn parse(
        &self,
        request_id: &str,
        data: Value,
    ) -> Result<Box<dyn ActionRequest>, serde_json::Error>;
}

/// Deserialize an envelope payload
pub fn parse_data<T: DeserializeOwned>(data: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}

/// Outcome of executing a request
pub struct ActionReply {
    pub response: ClientResponse,
    /// Work started once `response` is queued
    pub follow_up: Option<BoxFuture<'static, ()>>,
}

impl ActionReply {
    pub fn new(response: ClientResponse) -> Self {
        Self {
            response,
            follow_up: None,
        }
    }

    /// Run `work` in the background after the response has been queued
    pub fn then<F>(mut self, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.follow_up = Some(Box::pin(work));
        self
    }
}

/// Registered request handlers
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: Vec<Arc<dyn RequestAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler
    ///
    /// Several handlers may claim the same type; all of them run, in
    /// registration order, each producing its own response.
    pub fn register(&mut self, action: impl RequestAction + 'static) -> &mut Self {
        self.actions.push(Arc::new(action));
        self
    }

    pub fn with(mut self, action: impl RequestAction + 'static) -> Self {
        self.register(action);
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Handle one raw inbound message
    pub async fn dispatch(&self, raw: &[u8], session: &Session) {
        let envelope: ActionEnvelope = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(client = %session.client_id(), error = %e, "Failed to parse action");
                let response =
                    ClientResponse::parse_error("", format!("action parsing error type: {}", e));
                let _ = session.send(response).await;
                return;
            }
        };

        if !envelope.is_request() {
            debug!(client = %session.client_id(), action = %envelope.r#type, "unrecognized action");
            return;
        }

        info!("{}: {}", envelope.request_id, envelope.r#type);

        let mut handled = false;
        for action in self
            .actions
            .iter()
            .filter(|a| a.action_type() == envelope.r#type)
        {
            handled = true;

            let request = match action.parse(&envelope.request_id, envelope.data.clone()) {
                Ok(request) => request,
                Err(e) => {
                    warn!(
                        request_id = %envelope.request_id,
                        action = %envelope.r#type,
                        error = %e,
                        "Failed to parse action payload"
                    );
                    let mut response = ClientResponse::parse_error(
                        envelope.request_id.clone(),
                        format!("action parsing error type: {}", e),
                    );
                    response.silent_error = envelope.silent_error;
                    if session.send(response).await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            let ActionReply {
                mut response,
                follow_up,
            } = request.exec(session).await;
            response.silent_error = envelope.silent_error;

            if session.send(response).await.is_err() {
                return;
            }
            if let Some(work) = follow_up {
                tokio::spawn(work);
            }
        }

        if !handled {
            debug!(action = %envelope.r#type, "No handler registered");
        }
    }
}
