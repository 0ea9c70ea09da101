//! Provider error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Errors that can occur while querying an LLM provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// TCP/HTTP connection to the provider endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The provider did not respond within the configured timeout.
    #[error("provider timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// 401/403: missing, invalid or unauthorized credential.
    #[error("authentication failed (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    /// 429: the provider is throttling us.
    #[error("rate limited by provider: {body}")]
    RateLimited { body: String },

    /// Any other non-2xx HTTP response.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// A 2xx body that does not match the expected response shape.
    #[error("malformed provider response: {reason}")]
    MalformedResponse { reason: String },

    /// SSE stream read or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// Provider selection or configuration error.
    #[error("config error: {reason}")]
    Config { reason: String },
}

impl ProviderError {
    /// Map a non-success HTTP status and body to the matching variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ProviderError::Auth { status, body },
            429 => ProviderError::RateLimited { body },
            _ => ProviderError::HttpError { status, body },
        }
    }

    /// Map a `reqwest` transport error, keeping the endpoint for context.
    pub fn from_reqwest(err: reqwest::Error, endpoint: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                duration_secs: timeout_secs,
            }
        } else if err.is_decode() || err.is_body() {
            ProviderError::StreamError {
                reason: err.to_string(),
            }
        } else {
            ProviderError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        }
    }
}
