//! Heartbeat Manager
//!
//! Keeps the price stream alive by requesting a ping payload at a fixed
//! interval while the connection is open. Optionally treats a connection
//! that has delivered nothing for too long as dead.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::StreamSettings;

/// Shortest ping period the loop will run with.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Inbound silence after which the connection is considered dead.
    /// `None` disables the check; the transport's own close/error is then
    /// the only signal of a dead connection.
    pub idle_timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(2),
            idle_timeout: None,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, idle_timeout: Option<Duration>) -> Self {
        Self {
            ping_interval,
            idle_timeout,
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            idle_timeout: settings.idle_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Request to send a ping message.
    SendPing,
    /// Nothing was received within the idle timeout.
    IdleTimeout,
}

/// Inbound activity shared between the heartbeat manager and the reader.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame arrived.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Get the time since the last inbound frame.
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }
}

/// Heartbeat manager for one open connection.
///
/// Runs as its own task and asks the connection loop to send pings over
/// an mpsc channel. Cancelling its token stops it; the connection manager
/// derives that token from its own so `stop()` reaches it too.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the heartbeat loop until cancelled or an idle timeout fires.
    ///
    /// The first ping goes out one full interval after start. Periods
    /// shorter than [`MIN_PING_INTERVAL`] are raised to it.
    pub async fn run(self) {
        let period = self.config.ping_interval.max(MIN_PING_INTERVAL);
        if period != self.config.ping_interval {
            tracing::warn!(
                configured_ms = self.config.ping_interval.as_millis(),
                period_ms = period.as_millis(),
                "Ping interval below minimum, clamping"
            );
        }
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check inbound activity and request a ping.
    ///
    /// Returns `Err(())` if the loop should exit.
    async fn check_and_ping(&self) -> Result<(), ()> {
        if let Some(idle_timeout) = self.config.idle_timeout {
            let elapsed = self.state.time_since_inbound();
            if elapsed > idle_timeout {
                tracing::warn!(
                    elapsed_ms = elapsed.as_millis(),
                    timeout_ms = idle_timeout.as_millis(),
                    "Price stream idle timeout"
                );
                let _ = self.event_tx.send(HeartbeatEvent::IdleTimeout).await;
                return Err(());
            }
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return Err(());
        }

        Ok(())
    }
}
