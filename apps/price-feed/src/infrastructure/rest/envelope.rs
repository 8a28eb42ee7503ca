//! Uniform response wrapper.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Response payload plus the HTTP status it arrived with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    /// Decoded body.
    pub data: T,
    /// HTTP status code.
    pub status: u16,
    /// Status reason text.
    pub status_text: String,
}

impl<T> ResponseEnvelope<T> {
    /// Wrap `data` received with `status`.
    #[must_use]
    pub fn new(data: T, status: StatusCode) -> Self {
        Self {
            data,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
        }
    }

    /// Transform the payload, keeping status information.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResponseEnvelope<U> {
        ResponseEnvelope {
            data: f(self.data),
            status: self.status,
            status_text: self.status_text,
        }
    }
}
