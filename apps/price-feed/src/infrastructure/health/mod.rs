//! Status, Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, the current price snapshot, cached
//! market-data lookups and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (ready once the stream is connected)
//! - `GET /prices` - Price store snapshot
//! - `GET /market/listings` - Cached CoinMarketCap listings (query passed through)
//! - `GET /market/quotes?symbol=BTC,ETH` - Cached CoinMarketCap quotes
//! - `GET /market/rates` - Cached exchange rates (query passed through)
//! - `GET /metrics` - Prometheus metrics in text format

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::ConnectionState;
use crate::infrastructure::feed::ConnectionManager;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::rest::{ApiError, CryptoService, ExchangeRatesService, QueryParams};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Price stream status.
    pub feed: FeedInfo,
    /// Which market-data backends are configured.
    pub market_data: MarketDataInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream connected.
    Healthy,
    /// Stream connecting.
    Degraded,
    /// Stream disconnected.
    Unhealthy,
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Healthy,
            ConnectionState::Connecting => Self::Degraded,
            ConnectionState::Disconnected => Self::Unhealthy,
        }
    }
}

/// Price stream status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether the stream is connected.
    pub connected: bool,
    /// Symbols with a known price.
    pub symbols: usize,
    /// Ticks applied since startup.
    pub ticks_applied: u64,
    /// Time of the last applied tick.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Messages dropped as malformed.
    pub malformed_messages: u64,
    /// Current reconnect attempts (0 if connected).
    pub reconnect_attempts: u32,
}

/// Market-data backend availability.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MarketDataInfo {
    /// CoinMarketCap key configured.
    pub crypto: bool,
    /// Exchange-rates key configured.
    pub exchange_rates: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    manager: Arc<ConnectionManager>,
    crypto: Option<Arc<CryptoService>>,
    exchange_rates: Option<Arc<ExchangeRatesService>>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, manager: Arc<ConnectionManager>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            manager,
            crypto: None,
            exchange_rates: None,
        }
    }

    /// Serve `/market/listings` and `/market/quotes` from `service`.
    #[must_use]
    pub fn with_crypto(mut self, service: Arc<CryptoService>) -> Self {
        self.crypto = Some(service);
        self
    }

    /// Serve `/market/rates` from `service`.
    #[must_use]
    pub fn with_exchange_rates(mut self, service: Arc<ExchangeRatesService>) -> Self {
        self.exchange_rates = Some(service);
        self
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Status HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind `0.0.0.0:port` and run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        self.run_on(listener).await
    }

    /// Run on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if the HTTP server fails while running.
    pub async fn run_on(self, listener: TcpListener) -> Result<(), HealthServerError> {
        let app = router(self.state);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Status server listening");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Status server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/prices", get(prices_handler))
        .route("/market/listings", get(listings_handler))
        .route("/market/quotes", get(quotes_handler))
        .route("/market/rates", get(rates_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.manager.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn prices_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.manager.store().snapshot())
}

async fn listings_handler(
    State(state): State<Arc<HealthServerState>>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    let Some(crypto) = &state.crypto else {
        return not_configured("CoinMarketCap");
    };
    match crypto.listings_latest(&to_params(query)).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => upstream_failed(&e),
    }
}

async fn quotes_handler(
    State(state): State<Arc<HealthServerState>>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    let Some(crypto) = &state.crypto else {
        return not_configured("CoinMarketCap");
    };
    let symbols: Vec<&str> = query
        .get("symbol")
        .map(|s| s.split(',').collect())
        .unwrap_or_default();
    if symbols.iter().all(|s| s.trim().is_empty()) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "query parameter 'symbol' is required".to_string(),
            None,
        );
    }
    match crypto.quotes_latest(&symbols).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => upstream_failed(&e),
    }
}

async fn rates_handler(
    State(state): State<Arc<HealthServerState>>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    let Some(rates) = &state.exchange_rates else {
        return not_configured("exchange rates");
    };
    match rates.latest(&to_params(query)).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => upstream_failed(&e),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn to_params(query: BTreeMap<String, String>) -> QueryParams {
    query
        .into_iter()
        .fold(QueryParams::new(), |params, (key, value)| params.with(key, value))
}

fn not_configured(backend: &str) -> Response {
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        format!("{backend} API key not configured"),
        None,
    )
}

fn upstream_failed(error: &ApiError) -> Response {
    error_response(StatusCode::BAD_GATEWAY, error.to_string(), error.status())
}

fn error_response(status: StatusCode, error: String, upstream_status: Option<u16>) -> Response {
    (
        status,
        Json(ErrorBody {
            error,
            upstream_status,
        }),
    )
        .into_response()
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let store = state.manager.store();
    let connection_state = store.connection_status();

    HealthResponse {
        status: HealthStatus::from(connection_state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed: FeedInfo {
            state: connection_state,
            connected: connection_state.is_connected(),
            symbols: store.len(),
            ticks_applied: store.ticks_applied(),
            last_tick_at: store.last_tick_at(),
            malformed_messages: state.manager.malformed_messages(),
            reconnect_attempts: state.manager.reconnect_attempts(),
        },
        market_data: MarketDataInfo {
            crypto: state.crypto.is_some(),
            exchange_rates: state.exchange_rates.is_some(),
        },
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn health_status_follows_connection_state() {
        assert_eq!(
            HealthStatus::from(ConnectionState::Connected),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthStatus::from(ConnectionState::Connecting),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::from(ConnectionState::Disconnected),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn query_is_carried_into_params() {
        let query = BTreeMap::from([
            ("limit".to_string(), "10".to_string()),
            ("convert".to_string(), "USD".to_string()),
        ]);
        assert_eq!(
            to_params(query).cache_key("listings_latest"),
            "listings_latest?convert=USD&limit=10"
        );
    }

    #[test]
    fn upstream_error_maps_to_bad_gateway() {
        let response = upstream_failed(&ApiError::UpstreamRejected {
            status: 401,
            message: "bad key".to_string(),
        });
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = not_configured("CoinMarketCap");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
