//! Price Feed Binary
//!
//! Streams prices into the store and serves status, prices and cached
//! market data over HTTP.
//!
//! # Usage
//!
//! ```bash
//! PRICE_FEED_WS_URL=wss://example.com/prices cargo run --bin price-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PRICE_FEED_WS_URL`: WebSocket URL of the price stream
//!
//! ## Optional
//! - `PRICE_FEED_PROFILE`: realtime | relaxed (default: realtime)
//! - `PRICE_FEED_HEARTBEAT_INTERVAL_SECS`, `PRICE_FEED_IDLE_TIMEOUT_SECS`
//! - `PRICE_FEED_RECONNECT_STRATEGY`: exponential | fixed
//! - `PRICE_FEED_RECONNECT_DELAY_INITIAL_MS`, `PRICE_FEED_RECONNECT_DELAY_MAX_SECS`,
//!   `PRICE_FEED_RECONNECT_DELAY_MULTIPLIER`, `PRICE_FEED_MAX_RECONNECT_ATTEMPTS`
//! - `API_BASE_URL`, `CMC_BASE_URL`, `CMC_API_KEY`, `EXCHANGE_RATES_BASE_URL`,
//!   `EXCHANGE_RATES_API_KEY`
//! - `HTTP_TIMEOUT_SECS` (default: 10), `CACHE_TTL_SECS` (default: 60),
//!   `CACHE_MAX_ENTRIES` (default: 256)
//! - `PRICE_FEED_STATUS_PORT`: Status HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_feed::infrastructure::feed::{
    ConnectionManager, FeedClientConfig, FeedEvent, WsConnector,
};
use price_feed::infrastructure::health::{HealthServer, HealthServerState};
use price_feed::infrastructure::rest::{CryptoService, ExchangeRatesService, RestBackend};
use price_feed::infrastructure::telemetry;
use price_feed::{FeedConfig, PriceStore, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize tracing")?;

    tracing::info!("Starting price feed");

    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = FeedConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store = PriceStore::shared();
    let (event_tx, event_rx) = mpsc::channel::<FeedEvent>(256);
    let manager = Arc::new(
        ConnectionManager::new(
            FeedClientConfig::from_stream_settings(&config.stream),
            Arc::new(WsConnector::new()),
            Arc::clone(&store),
        )
        .with_events(event_tx),
    );

    tokio::spawn(handle_feed_events(event_rx));

    let mut health_state =
        HealthServerState::new(env!("CARGO_PKG_VERSION").to_string(), Arc::clone(&manager));

    match CryptoService::from_settings(&config.api).context("CoinMarketCap client")? {
        Some(service) => health_state = health_state.with_crypto(Arc::new(service)),
        None => tracing::info!("CMC_API_KEY not set, crypto market data disabled"),
    }
    match ExchangeRatesService::from_settings(&config.api).context("exchange rates client")? {
        Some(service) => health_state = health_state.with_exchange_rates(Arc::new(service)),
        None => tracing::info!("EXCHANGE_RATES_API_KEY not set, exchange rates disabled"),
    }

    let api = RestBackend::from_api_settings(&config.api).context("API backend")?;
    tracing::info!(backend = api.name(), base_url = api.base_url(), "CRUD API backend ready");

    let health_server = HealthServer::new(
        config.server.status_port,
        Arc::new(health_state),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Status server error");
        }
    });

    manager.connect();

    tracing::info!("Price feed ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, manager.stop())
        .await
        .is_err()
    {
        tracing::warn!("Price stream did not stop within the shutdown timeout");
    }

    tracing::info!("Price feed stopped");
    Ok(())
}

/// Log connection manager lifecycle events.
async fn handle_feed_events(mut rx: mpsc::Receiver<FeedEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::StateChanged(state) => {
                tracing::debug!(%state, "Price stream state");
            }
            FeedEvent::ReconnectScheduled { attempt, delay } => {
                tracing::debug!(attempt, delay_ms = delay.as_millis(), "Reconnect scheduled");
            }
            FeedEvent::GaveUp { attempts } => {
                tracing::error!(
                    attempts,
                    "Price stream gave up reconnecting; restart the service to retry"
                );
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        url = %config.stream.url,
        profile = config.stream.profile.as_str(),
        heartbeat_secs = config.stream.heartbeat_interval.as_secs(),
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        status_port = config.server.status_port,
        "Configuration loaded"
    );
    tracing::debug!(
        api_base_url = %config.api.api_base_url,
        cmc_base_url = %config.api.cmc.base_url,
        exchange_rates_base_url = %config.api.exchange_rates.base_url,
        cache_ttl_secs = config.api.cache_ttl.as_secs(),
        "REST endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
