//! Price Stream Connection Manager
//!
//! Owns the single streaming connection to the price feed and keeps the
//! [`PriceStore`](crate::domain::store::PriceStore) up to date.
//!
//! # Lifecycle
//!
//! ```text
//! disconnected ──connect()──► connecting ──open──► connected
//!      ▲                          │                    │
//!      │                       failed            close / error
//!      │                          ▼                    ▼
//!      └──── backoff timer ◄── disconnected ◄──────────┘
//! ```
//!
//! Every transition is written to the store. `connected` never goes
//! straight back to `connecting`. Once the reconnect policy gives up the
//! manager stays `disconnected` until `connect()` is called again.
//!
//! # Timers
//!
//! The heartbeat task and the reconnect sleep both hang off one
//! `CancellationToken`, so `stop()` tears down everything in one call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, TickCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::StreamSettings;
use crate::application::ports::{FeedConnector, InboundFrame, TransportError};
use crate::domain::store::SharedPriceStore;
use crate::domain::streaming::ConnectionState;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Reasons a streaming session ended.
///
/// These never reach callers of the manager; they are logged and turned
/// into a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// Transport failure (connect, send or receive).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Outbound payload could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No inbound frame within the idle timeout.
    #[error("idle timeout")]
    IdleTimeout,

    /// Peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FeedClientError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(TransportError::Connect(_)) => "connect",
            Self::Transport(_) => "transport",
            Self::Codec(_) => "codec",
            Self::IdleTimeout => "idle_timeout",
            Self::ConnectionClosed => "closed",
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Lifecycle events for an optional observer (logging, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A reconnect attempt was scheduled.
    ReconnectScheduled {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// The reconnect policy ran out of attempts.
    GaveUp {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl FeedClientConfig {
    /// Realtime profile: 2s heartbeat, exponential backoff capped at five attempts.
    #[must_use]
    pub fn realtime(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::capped_exponential(),
            heartbeat: HeartbeatConfig::new(Duration::from_secs(2), None),
        }
    }

    /// Relaxed profile: 30s heartbeat, fixed 3s delay retried forever.
    #[must_use]
    pub fn relaxed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::fixed_delay(),
            heartbeat: HeartbeatConfig::new(Duration::from_secs(30), None),
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            url: settings.url.clone(),
            reconnect: ReconnectConfig::from_stream_settings(settings),
            heartbeat: HeartbeatConfig::from_stream_settings(settings),
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Reconnecting price stream client.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use price_feed::domain::store::PriceStore;
/// use price_feed::infrastructure::feed::{ConnectionManager, FeedClientConfig, WsConnector};
///
/// async fn example() {
///     let store = PriceStore::shared();
///     let manager = Arc::new(ConnectionManager::new(
///         FeedClientConfig::realtime("wss://example.com/prices"),
///         Arc::new(WsConnector::new()),
///         Arc::clone(&store),
///     ));
///
///     manager.connect();
///     // ... read store.price("BTC") from anywhere ...
///     manager.stop().await;
/// }
/// ```
pub struct ConnectionManager {
    config: FeedClientConfig,
    connector: Arc<dyn FeedConnector>,
    store: SharedPriceStore,
    codec: TickCodec,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    event_tx: Option<mpsc::Sender<FeedEvent>>,
    malformed_messages: AtomicU64,
    reconnect_attempts: AtomicU32,
}

impl ConnectionManager {
    /// Create a new connection manager. Nothing happens until `connect()`.
    #[must_use]
    pub fn new(
        config: FeedClientConfig,
        connector: Arc<dyn FeedConnector>,
        store: SharedPriceStore,
    ) -> Self {
        Self {
            config,
            connector,
            store,
            codec: TickCodec::new(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            event_tx: None,
            malformed_messages: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    /// Report lifecycle events to `event_tx`.
    ///
    /// Events are dropped rather than awaited when the channel is full.
    #[must_use]
    pub fn with_events(mut self, event_tx: mpsc::Sender<FeedEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Start the connection loop.
    ///
    /// Returns `false` if a loop is already running or the manager has
    /// been stopped.
    pub fn connect(self: &Arc<Self>) -> bool {
        if self.cancel.is_cancelled() {
            tracing::debug!("Ignoring connect on stopped price stream");
            return false;
        }

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        *task = Some(tokio::spawn(Arc::clone(self).run()));
        true
    }

    /// Stop the manager: close the transport, cancel the heartbeat and any
    /// pending reconnect, and wait for the loop to exit.
    ///
    /// No reconnect happens after this returns.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Price stream task ended abnormally");
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Check whether the stream is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.store.connection_status().is_connected()
    }

    /// Check whether `stop()` has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The store this manager writes to.
    #[must_use]
    pub const fn store(&self) -> &SharedPriceStore {
        &self.store
    }

    /// Number of inbound messages dropped as malformed.
    #[must_use]
    pub fn malformed_messages(&self) -> u64 {
        self.malformed_messages.load(Ordering::Relaxed)
    }

    /// Consecutive reconnect attempts since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Connection loop: connect, stream, back off, repeat.
    async fn run(self: Arc<Self>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Price stream cancelled");
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let result = self.connect_and_run(&mut policy).await;
            self.set_state(ConnectionState::Disconnected);

            match result {
                Ok(()) => {
                    tracing::info!("Price stream stopped");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Price stream connection lost");
                    metrics::record_connection_error(e.kind());
                }
            }

            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                tracing::error!(attempts, "Price stream reconnect attempts exhausted");
                self.emit(FeedEvent::GaveUp { attempts });
                break;
            };

            let attempt = policy.attempt_count();
            self.reconnect_attempts.store(attempt, Ordering::Relaxed);
            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to price stream"
            );
            self.emit(FeedEvent::ReconnectScheduled { attempt, delay });

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Price stream cancelled during reconnect delay");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Connect and stream until error or cancellation.
    ///
    /// `Ok(())` means the manager was stopped.
    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), FeedClientError> {
        tracing::info!(url = %self.config.url, "Connecting to price stream");

        let mut transport = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = self.connector.connect(&self.config.url) => result?,
        };

        policy.reset();
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        self.set_state(ConnectionState::Connected);

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    transport.close().await;
                    return Ok(());
                }
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => {
                        let ping = self.codec.encode_ping()?;
                        transport.send_text(ping).await?;
                        tracing::trace!("Heartbeat ping sent");
                    }
                    HeartbeatEvent::IdleTimeout => {
                        transport.close().await;
                        return Err(FeedClientError::IdleTimeout);
                    }
                },
                frame = transport.next_frame() => match frame {
                    Some(Ok(InboundFrame::Text(text))) => {
                        heartbeat_state.record_inbound();
                        self.handle_text(&text);
                    }
                    Some(Ok(InboundFrame::Control)) => heartbeat_state.record_inbound(),
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(FeedClientError::ConnectionClosed),
                },
            }
        }
    }

    /// Apply a text frame to the store, or count it as malformed.
    fn handle_text(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(tick) => {
                tracing::trace!(symbol = %tick.symbol, price = %tick.price, "Price tick");
                metrics::record_tick();
                self.store.apply_tick(tick);
            }
            Err(e) => {
                let total = self.malformed_messages.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_malformed_message();
                tracing::debug!(error = %e, total, "Dropping malformed price message");
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.store.set_connection_status(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Price stream state changed");
            metrics::set_connection_state(state);
            self.emit(FeedEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: FeedEvent) {
        if let Some(tx) = &self.event_tx
            && let Err(e) = tx.try_send(event)
        {
            tracing::debug!(error = %e, "Dropping feed event");
        }
    }
}
