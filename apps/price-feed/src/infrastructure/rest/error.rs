//! REST client error types.
//!
//! Every failed call surfaces as one [`ApiError`]. The `Display` text is
//! the flattened message callers used to match on; `kind()` and `status()`
//! give the same information in structured form.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Coarse classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// The server answered with a non-2xx status.
    UpstreamRejected,
    /// The request went out but nothing came back.
    NoResponse,
    /// Anything else (bad URL, undecodable body, ...).
    Unexpected,
}

impl ApiErrorKind {
    /// Label used in metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpstreamRejected => "rejected",
            Self::NoResponse => "no_response",
            Self::Unexpected => "unexpected",
        }
    }
}

/// Errors from the REST clients.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Non-2xx response.
    #[error("API Error: {status} - {message}")]
    UpstreamRejected {
        /// HTTP status code.
        status: u16,
        /// Body `message` field, or the status reason text.
        message: String,
    },

    /// Connect failure, timeout or request lost in flight.
    #[error("API Error: No response received from server")]
    NoResponse,

    /// Request could not be built or the response could not be read.
    #[error("API Error: {0}")]
    Unexpected(String),
}

impl ApiError {
    /// Build an `Unexpected` error, falling back to "Unknown error" for an
    /// empty description.
    #[must_use]
    pub fn unexpected(description: impl Into<String>) -> Self {
        let description = description.into();
        if description.trim().is_empty() {
            Self::Unexpected("Unknown error".to_string())
        } else {
            Self::Unexpected(description)
        }
    }

    /// Structured classification.
    #[must_use]
    pub const fn kind(&self) -> ApiErrorKind {
        match self {
            Self::UpstreamRejected { .. } => ApiErrorKind::UpstreamRejected,
            Self::NoResponse => ApiErrorKind::NoResponse,
            Self::Unexpected(_) => ApiErrorKind::Unexpected,
        }
    }

    /// HTTP status, when the server answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::UpstreamRejected { status, .. } => Some(*status),
            Self::NoResponse | Self::Unexpected(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Normalize a non-2xx response.
///
/// The message is the body's `message` field when present and non-empty,
/// otherwise the canonical reason phrase of `status`.
#[must_use]
pub fn rejection(status: StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());

    ApiError::UpstreamRejected {
        status: status.as_u16(),
        message,
    }
}

/// Normalize a `reqwest` failure that produced no response.
#[must_use]
pub fn classify_transport_error(error: &reqwest::Error) -> ApiError {
    if error.is_builder() {
        return ApiError::unexpected(error.to_string());
    }
    if error.is_connect() || error.is_timeout() || error.is_request() || error.is_body() {
        return ApiError::NoResponse;
    }
    ApiError::unexpected(error.to_string())
}
