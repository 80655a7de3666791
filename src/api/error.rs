//! Error types for API transport operations.

use thiserror::Error;

/// Errors produced while talking to the chat API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected our credentials (HTTP 401).
    #[error("unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Any other non-success HTTP status.
    #[error("request failed with HTTP {status}")]
    Status { status: u16 },

    /// No connection or no first byte within the connection deadline.
    #[error("request timed out")]
    Timeout,

    /// Transport-level failure from the HTTP client.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The request was cancelled by the caller.
    #[error("request aborted")]
    Aborted,

    /// The server answered 200 but embedded an error object in the body.
    #[error("provider error: {0}")]
    Provider(String),

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ApiError {
    /// True for the 401 credential-rejection case.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// True when the failure was caller-initiated cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Convenience type alias for API results.
pub type ApiResult<T> = Result<T, ApiError>;
