//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the REST clients and the
//! status server.

/// Price stream connection manager and WebSocket transport.
pub mod feed;

/// REST backends, market-data clients and the response cache.
pub mod rest;

/// Configuration loading.
pub mod config;

/// Status, health and metrics HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
