//! Price Streaming Types
//!
//! Core domain types for the price stream: the connection lifecycle state
//! and the tick payload pushed into the price store.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A symbol string (e.g. `BTC`, `ETH`).
pub type Symbol = String;

/// Lifecycle state of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection. Initial state, and terminal once reconnects give up.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The transport is open and ticks are flowing.
    Connected,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Check if this is the connected state.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Numeric encoding used for the connection state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound price update for a single symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Last traded or quoted price.
    pub price: Decimal,
}

impl PriceTick {
    /// Create a new tick.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connected).unwrap(),
            "\"connected\""
        );
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connecting).unwrap(),
            "\"connecting\""
        );
        assert_eq!(
            serde_json::to_string(&ConnectionState::Disconnected).unwrap(),
            "\"disconnected\""
        );
    }

    #[test]
    fn connection_state_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::default().is_connected());
        assert!(ConnectionState::Connected.is_connected());
    }

    #[test]
    fn connection_state_display_matches_as_str() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ] {
            assert_eq!(state.to_string(), state.as_str());
        }
    }
}
