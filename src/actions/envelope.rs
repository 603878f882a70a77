//! Wire envelopes
//!
//! Both directions are JSON objects with PascalCase field names:
//!
//! ```json
//! // client -> server
//! {"Type": "URL_ARCHIVE_REQUEST", "RequestId": "r1", "SilentError": false, "Data": {"Url": "http://example.com"}}
//!
//! // server -> client
//! {"Type": "URL_ARCHIVE_SUCCESS", "RequestId": "r1", "Schema": "URL", "Data": {...}, "SilentError": false}
//! ```
//!
//! Inbound field names are also accepted in camelCase.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix that makes an inbound type eligible for dispatch
pub const REQUEST_SUFFIX: &str = "REQUEST";

pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const URL_ARCHIVE_REQUEST: &str = "URL_ARCHIVE_REQUEST";
pub const URL_ARCHIVE_ERROR: &str = "URL_ARCHIVE_ERROR";
pub const URL_ARCHIVE_SUCCESS: &str = "URL_ARCHIVE_SUCCESS";
pub const URL_SET_LOADING: &str = "URL_SET_LOADING";
pub const URL_SET_ERROR: &str = "URL_SET_ERROR";
pub const URL_SET_SUCCESS: &str = "URL_SET_SUCCESS";
/// Broadcast of the outbound links found on an archived page
pub const FETCH_OUTBOUND_LINKS_SUCCESS: &str = "FETCH_OUTBOUND_LINKS_SUCCESS";
pub const METADATA_SAVE_REQUEST: &str = "METADATA_SAVE_REQUEST";
pub const METADATA_SAVE_SUCCESS: &str = "METADATA_SAVE_SUCCESS";
pub const METADATA_SAVE_ERROR: &str = "METADATA_SAVE_ERROR";
pub const METADATA_FOR_SUBJECT_REQUEST: &str = "METADATA_FOR_SUBJECT_REQUEST";
pub const METADATA_FOR_SUBJECT_SUCCESS: &str = "METADATA_FOR_SUBJECT_SUCCESS";
pub const METADATA_FOR_SUBJECT_ERROR: &str = "METADATA_FOR_SUBJECT_ERROR";

/// Request id used for messages the server originates on its own
pub const SERVER_REQUEST_ID: &str = "server";

/// Inbound action
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ActionEnvelope {
    #[serde(alias = "type")]
    pub r#type: String,
    #[serde(alias = "requestId")]
    pub request_id: String,
    #[serde(alias = "silentError")]
    pub silent_error: bool,
    #[serde(alias = "data")]
    pub data: Value,
}

impl ActionEnvelope {
    /// Only request types reach handlers; everything else is send-only traffic
    pub fn is_request(&self) -> bool {
        self.r#type.ends_with(REQUEST_SUFFIX)
    }
}

/// Outbound response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientResponse {
    pub r#type: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub silent_error: bool,
}

impl ClientResponse {
    pub fn new(r#type: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    /// Response carrying an error message
    pub fn error(
        r#type: impl Into<String>,
        request_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(r#type, request_id)
        }
    }

    /// `PARSE_ERROR` addressed to `request_id` (empty when the envelope itself
    /// could not be read)
    pub fn parse_error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::error(PARSE_ERROR, request_id, message)
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize `data` into the payload
    ///
    /// A payload that fails to serialize turns the response into an error.
    pub fn with_serialized<T: Serialize>(self, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.with_data(value),
            Err(e) => Self {
                error: Some(format!("response serialization error: {}", e)),
                ..self
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
