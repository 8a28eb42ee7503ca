//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Stream**: ticks applied, malformed messages, reconnects, connection state
//! - **REST**: upstream requests by backend and outcome
//! - **Cache**: response cache hits and misses
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the status server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed (for example
/// because another global recorder is already set).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Stream
    describe_counter!(
        "price_feed_ticks_total",
        "Total price ticks applied to the store"
    );
    describe_counter!(
        "price_feed_malformed_messages_total",
        "Total inbound stream messages dropped as malformed"
    );
    describe_counter!(
        "price_feed_reconnects_total",
        "Total reconnection attempts scheduled"
    );
    describe_counter!(
        "price_feed_connection_errors_total",
        "Total stream sessions ended by an error, by kind"
    );
    describe_gauge!(
        "price_feed_connection_state",
        "Stream state (0 = disconnected, 1 = connecting, 2 = connected)"
    );

    // REST
    describe_counter!(
        "price_feed_api_requests_total",
        "Total upstream REST requests by backend and outcome"
    );
    describe_histogram!(
        "price_feed_api_request_seconds",
        "Upstream REST request latency"
    );

    // Cache
    describe_counter!(
        "price_feed_cache_hits_total",
        "Response cache hits by cache name"
    );
    describe_counter!(
        "price_feed_cache_misses_total",
        "Response cache misses by cache name"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a tick applied to the store.
pub fn record_tick() {
    counter!("price_feed_ticks_total").increment(1);
}

/// Record a dropped malformed message.
pub fn record_malformed_message() {
    counter!("price_feed_malformed_messages_total").increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("price_feed_reconnects_total").increment(1);
}

/// Record a stream session that ended with an error.
pub fn record_connection_error(kind: &'static str) {
    counter!("price_feed_connection_errors_total", "kind" => kind).increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("price_feed_connection_state").set(state.as_gauge());
}

/// Record an upstream REST request.
pub fn record_api_request(backend: &str, outcome: &'static str, duration: Duration) {
    counter!(
        "price_feed_api_requests_total",
        "backend" => backend.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "price_feed_api_request_seconds",
        "backend" => backend.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a response cache lookup.
pub fn record_cache_lookup(cache: &str, hit: bool) {
    if hit {
        counter!("price_feed_cache_hits_total", "cache" => cache.to_string()).increment(1);
    } else {
        counter!("price_feed_cache_misses_total", "cache" => cache.to_string()).increment(1);
    }
}

// =============================================================================
// Tests
// =============================================================================
