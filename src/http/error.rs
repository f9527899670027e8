//! Normalized error envelope.
//!
//! Every failure leaving the HTTP pipeline or the token manager has this
//! shape, whatever the underlying transport reported.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Code for requests aborted through their cancellation token.
pub const CODE_CANCELED: &str = "ERR_CANCELED";
/// Code for failures where no response was received.
pub const CODE_NETWORK: &str = "ERR_NETWORK";
/// Code for per-attempt timeouts.
pub const CODE_TIMEOUT: &str = "ECONNABORTED";
/// Code for a 4xx/5xx response without a backend-provided code.
pub const CODE_BAD_RESPONSE: &str = "ERR_BAD_RESPONSE";

/// HTTP statuses worth retrying.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn cancelled() -> Self {
        Self::new("canceled").with_code(CODE_CANCELED)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(message).with_code(CODE_NETWORK)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message).with_code(CODE_TIMEOUT)
    }

    /// Build an error from a non-2xx response.
    ///
    /// A JSON object body contributes `message` (or `detail`), `code` and
    /// `details`; anything else falls back to a generic message.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let parsed: Option<Map<String, Value>> = serde_json::from_slice(body).ok();
        let field = |name: &str| {
            parsed
                .as_ref()
                .and_then(|m| m.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let message = field("message")
            .or_else(|| field("detail"))
            .unwrap_or_else(|| format!("Request failed with status code {}", status));
        let code = field("code").unwrap_or_else(|| CODE_BAD_RESPONSE.to_string());
        let details = parsed
            .as_ref()
            .and_then(|m| m.get("details"))
            .and_then(Value::as_object)
            .cloned();

        Self {
            message,
            code: Some(code),
            status: Some(status),
            details,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.code.as_deref() == Some(CODE_CANCELED)
    }

    /// No response reached the client (network failure or timeout).
    pub fn is_network(&self) -> bool {
        self.status.is_none()
            && matches!(self.code.as_deref(), Some(CODE_NETWORK) | Some(CODE_TIMEOUT))
    }

    /// Network-layer failures and [`RETRYABLE_STATUS_CODES`] are retryable;
    /// cancellation never is.
    pub fn is_retryable(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        match self.status {
            Some(status) => is_retryable_status(status),
            None => self.is_network(),
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}
