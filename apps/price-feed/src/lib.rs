#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::items_after_statements
    )
)]

//! Price Feed - Market Data Client Layer
//!
//! Keeps one reconnecting WebSocket connection to a price stream and writes
//! every tick into a shared store. Alongside it, thin REST clients wrap the
//! market-data backends with uniform envelopes, structured errors and a
//! short-lived response cache.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Price types and the shared store
//!   - `streaming`: Connection state and ticks
//!   - `store`: Last-known price per symbol plus connection state
//!
//! - **Application**: Port definitions
//!   - `ports`: Streaming connector and transport traits
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Connection manager, heartbeat, backoff, WebSocket transport
//!   - `rest`: CRUD and market-data clients, response cache
//!   - `config`: Environment configuration
//!   - `health`: Status HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! price stream WS ──► ConnectionManager ──► PriceStore ──► /prices, readers
//!
//! CoinMarketCap / exchange rates ──► ResourceClient ──► ResponseCache ──► /market/*
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core price types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::store::{PriceSnapshot, PriceStore, SharedPriceStore};
pub use domain::streaming::{ConnectionState, PriceTick, Symbol};

// Infrastructure config
pub use infrastructure::config::{
    ApiKey, ApiSettings, BackendSettings, ConfigError, FeedConfig, FeedProfile, ReconnectMode,
    ServerSettings, StreamSettings,
};

// Connection manager
pub use infrastructure::feed::{ConnectionManager, FeedClientConfig, FeedEvent};

// REST clients
pub use infrastructure::rest::{ApiError, ApiErrorKind, ResponseEnvelope};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
