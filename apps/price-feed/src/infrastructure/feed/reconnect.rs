//! Reconnection Policy
//!
//! Computes the delay before each reconnection attempt of the price stream.
//! Two strategies are supported, fixed delay and exponential backoff capped
//! at a maximum delay, each with an optional attempt limit and jitter.

use std::time::Duration;

use rand::Rng;

use crate::{ReconnectMode, StreamSettings};

/// How the delay grows between consecutive attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Same delay before every attempt.
    Fixed {
        /// Delay before each attempt.
        delay: Duration,
    },
    /// `min(initial * multiplier^attempt, max)`.
    Exponential {
        /// Delay before the first attempt.
        initial: Duration,
        /// Upper bound on any single delay.
        max: Duration,
        /// Growth factor per attempt (e.g. 2.0 doubles the delay).
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Delay before the attempt with the given zero-based index.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                #[allow(clippy::cast_precision_loss)]
                let base_millis = initial.as_millis() as f64;
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let scaled = base_millis * multiplier.powi(exponent);
                #[allow(clippy::cast_precision_loss)]
                let max_millis = max.as_millis() as f64;
                let capped = if scaled.is_nan() {
                    max_millis
                } else {
                    scaled.min(max_millis).max(0.0)
                };
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                Duration::from_millis(capped.round() as u64)
            }
        }
    }
}

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay growth strategy.
    pub strategy: BackoffStrategy,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::capped_exponential()
    }
}

impl ReconnectConfig {
    /// Exponential backoff 1s, 2s, 4s, 8s, 16s, then give up.
    #[must_use]
    pub const fn capped_exponential() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(30),
                multiplier: 2.0,
            },
            max_attempts: 5,
            jitter_factor: 0.0,
        }
    }

    /// Fixed 3s delay, retrying forever.
    #[must_use]
    pub const fn fixed_delay() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed {
                delay: Duration::from_secs(3),
            },
            max_attempts: 0,
            jitter_factor: 0.0,
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        let strategy = match settings.reconnect_mode {
            ReconnectMode::Fixed => BackoffStrategy::Fixed {
                delay: settings.reconnect_delay_initial,
            },
            ReconnectMode::Exponential => BackoffStrategy::Exponential {
                initial: settings.reconnect_delay_initial,
                max: settings.reconnect_delay_max,
                multiplier: settings.reconnect_delay_multiplier,
            },
        };
        Self {
            strategy,
            max_attempts: settings.max_reconnect_attempts,
            jitter_factor: settings.reconnect_jitter,
        }
    }
}

/// Reconnection policy tracking consecutive failed attempts.
///
/// # Example
///
/// ```rust
/// use price_feed::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::capped_exponential());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Get the delay before the next attempt and count it.
    ///
    /// Returns `None` if max attempts have been used up.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let delay = self.config.strategy.delay_for(self.attempt_count);
        self.attempt_count += 1;

        Some(self.apply_jitter(delay))
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
