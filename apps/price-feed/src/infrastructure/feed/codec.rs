//! Stream Codec Module
//!
//! Decodes inbound price ticks and encodes the outbound heartbeat.
//!
//! # Wire Format
//!
//! Inbound text frames are JSON objects with at least a `symbol` and a
//! numeric `price`; any other fields are ignored:
//!
//! ```json
//! {"symbol":"BTC","price":50000.25,"sequence":42}
//! ```
//!
//! The only outbound frame is the keep-alive `{"type":"ping"}`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::PriceTick;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Required field absent or null.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Symbol present but empty.
    #[error("empty symbol")]
    EmptySymbol,

    /// Price present but not a representable number.
    #[error("invalid price: {0}")]
    InvalidPrice(String),
}

#[derive(Debug, Deserialize)]
struct RawTick {
    symbol: Option<String>,
    price: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct PingMessage {
    #[serde(rename = "type")]
    msg_type: &'static str,
}

/// JSON codec for the price stream.
#[derive(Debug, Default, Clone)]
pub struct TickCodec;

impl TickCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into a tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object, or `symbol` /
    /// `price` are missing, empty, or not of the right type.
    pub fn decode(&self, text: &str) -> Result<PriceTick, CodecError> {
        let raw: RawTick = serde_json::from_str(text)?;

        let symbol = raw.symbol.ok_or(CodecError::MissingField("symbol"))?;
        if symbol.trim().is_empty() {
            return Err(CodecError::EmptySymbol);
        }

        let price = match raw.price {
            None | Some(serde_json::Value::Null) => return Err(CodecError::MissingField("price")),
            Some(value @ serde_json::Value::Number(_)) => serde_json::from_value::<Decimal>(value)
                .map_err(|e| CodecError::InvalidPrice(e.to_string()))?,
            Some(other) => return Err(CodecError::InvalidPrice(other.to_string())),
        };

        Ok(PriceTick { symbol, price })
    }

    /// Encode the keep-alive ping payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_ping(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&PingMessage { msg_type: "ping" })?)
    }
}
