//! Wire types exchanged with the processing backend.
//!
//! Outbound:
//!
//! ```text
//! { "UUID": "<uuid-v4>",
//!   "Request": { "TRANSACTION TYPE", "ORDER TYPE"?, "FORMAT", "RESPONSE TYPE", "Input File"? } }
//! ```
//!
//! Inbound: `{ "response": [ { success, filename, content, mimeType, message }, ... ] }`.
//! Older backends answer with a single object instead of an array; both are accepted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::form::{FormatType, OrderType, ResponseType, TransactionType};

/// Identifier attached to a request so its result or error can be traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Full form: this is surfaced to users for support tickets
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        CorrelationId(uuid)
    }
}

impl std::ops::Deref for CorrelationId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Canonical request body sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "UUID")]
    pub correlation_id: CorrelationId,
    #[serde(rename = "Request")]
    pub request: RequestBody,
}

/// Selections and file content for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(rename = "TRANSACTION TYPE")]
    pub transaction_type: TransactionType,

    /// Present only when the selection makes the order type applicable
    #[serde(rename = "ORDER TYPE", skip_serializing_if = "Option::is_none", default)]
    pub order_type: Option<OrderType>,

    #[serde(rename = "FORMAT")]
    pub format: FormatType,

    #[serde(rename = "RESPONSE TYPE")]
    pub response_type: ResponseType,

    /// Base64 file content, present only when the selection requires a file
    #[serde(rename = "Input File", skip_serializing_if = "Option::is_none", default)]
    pub input_file: Option<String>,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

/// One generated artifact returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    pub filename: String,
    /// Base64 content; some backends send literal text here
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponseItems {
    Many(Vec<ProcessingResult>),
    One(Box<ProcessingResult>),
}

#[derive(Debug, Deserialize)]
struct ResponsePayload {
    response: ResponseItems,
}

/// Parse a backend response body into its result items.
///
/// The body must be an object with a `response` field holding either an array
/// of items or a single legacy item. Any other top-level value is rejected.
pub fn parse_response(body: &str) -> serde_json::Result<Vec<ProcessingResult>> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    // Structs also deserialize from sequences; only the object form is valid here
    if !value.is_object() {
        return Err(serde::de::Error::custom(
            "expected an object with a `response` field",
        ));
    }
    let payload = ResponsePayload::deserialize(value)?;
    Ok(match payload.response {
        ResponseItems::Many(items) => items,
        ResponseItems::One(item) => vec![*item],
    })
}
