//! Provider and transport error types.
//!
//! Only these errors can end a turn early. Everything recoverable (bad
//! stream frames, tool failures, unparseable fallback replies) is absorbed
//! closer to where it happens.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Non-2xx HTTP response from the provider.
    #[error("API error ({status}): {body}")]
    Http { status: u16, body: String },

    /// The request never got a response.
    #[error("failed to reach {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    /// A non-streaming request exceeded its bounded wait.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider answered with a body we could not interpret.
    #[error("failed to decode provider response: {reason}")]
    Decode { reason: String },
}

impl LlmError {
    /// Build an error from a failed `reqwest` send.
    pub fn from_send(endpoint: &str, timeout_secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout { secs: timeout_secs }
        } else {
            LlmError::Connection {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// True when the provider refused the request shape itself, which for a
    /// request carrying tool schemas means native tool calling is unsupported.
    pub fn is_capability_rejection(&self) -> bool {
        matches!(self.status(), Some(400 | 422))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// How long to wait for the body of an error response. Streaming requests
/// carry no overall timeout, so this is what bounds a stalled error body.
const ERROR_BODY_TIMEOUT: Duration = Duration::from_secs(5);

/// Turn a response into an `LlmError::Http` unless it succeeded.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, LlmError> {
    ensure_success_within(response, ERROR_BODY_TIMEOUT).await
}

async fn ensure_success_within(
    response: reqwest::Response,
    body_timeout: Duration,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match tokio::time::timeout(body_timeout, response.text()).await {
        Ok(text) => text.unwrap_or_default(),
        Err(_) => {
            warn!(status = status.as_u16(), "error body not received in time");
            String::new()
        }
    };
    Err(LlmError::Http {
        status: status.as_u16(),
        body,
    })
}
