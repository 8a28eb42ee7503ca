//! Price Feed Configuration Settings
//!
//! Configuration types for the price feed service, loaded from environment
//! variables.

use std::time::Duration;

/// Named bundle of heartbeat interval and reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedProfile {
    /// 2s heartbeat, exponential backoff capped at five attempts.
    #[default]
    Realtime,
    /// 30s heartbeat, fixed 3s delay retried forever.
    Relaxed,
}

impl FeedProfile {
    /// Parse profile from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "relaxed" | "fixed" => Self::Relaxed,
            _ => Self::Realtime,
        }
    }

    /// Get the profile name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Relaxed => "relaxed",
        }
    }
}

/// Reconnect delay strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// `min(initial * multiplier^attempt, max)`.
    Exponential,
    /// Constant delay.
    Fixed,
}

impl ReconnectMode {
    /// Parse mode from string, returning `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exponential" | "backoff" => Some(Self::Exponential),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

/// API key with redacted `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Get the key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket URL of the price stream.
    pub url: String,
    /// Profile the timers were derived from.
    pub profile: FeedProfile,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Inbound silence before the connection is considered dead.
    pub idle_timeout: Option<Duration>,
    /// Reconnect delay strategy.
    pub reconnect_mode: ReconnectMode,
    /// Initial (or fixed) reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Jitter fraction applied to each delay.
    pub reconnect_jitter: f64,
}

impl StreamSettings {
    /// Settings for a named profile.
    #[must_use]
    pub const fn for_profile(url: String, profile: FeedProfile) -> Self {
        match profile {
            FeedProfile::Realtime => Self {
                url,
                profile,
                heartbeat_interval: Duration::from_secs(2),
                idle_timeout: None,
                reconnect_mode: ReconnectMode::Exponential,
                reconnect_delay_initial: Duration::from_secs(1),
                reconnect_delay_max: Duration::from_secs(30),
                reconnect_delay_multiplier: 2.0,
                max_reconnect_attempts: 5,
                reconnect_jitter: 0.0,
            },
            FeedProfile::Relaxed => Self {
                url,
                profile,
                heartbeat_interval: Duration::from_secs(30),
                idle_timeout: None,
                reconnect_mode: ReconnectMode::Fixed,
                reconnect_delay_initial: Duration::from_secs(3),
                reconnect_delay_max: Duration::from_secs(3),
                reconnect_delay_multiplier: 1.0,
                max_reconnect_attempts: 0,
                reconnect_jitter: 0.0,
            },
        }
    }
}

/// One REST backend: base URL plus optional key.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// API key, if configured.
    pub api_key: Option<ApiKey>,
}

/// REST client settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Generic CRUD API base URL.
    pub api_base_url: String,
    /// CoinMarketCap backend.
    pub cmc: BackendSettings,
    /// Exchange-rates backend.
    pub exchange_rates: BackendSettings,
    /// Per-request timeout.
    pub http_timeout: Duration,
    /// Default TTL of cached market-data responses.
    pub cache_ttl: Duration,
    /// Maximum cached entries per client (0 = unbounded).
    pub cache_max_entries: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.example.com".to_string(),
            cmc: BackendSettings {
                base_url: "https://pro-api.coinmarketcap.com".to_string(),
                api_key: None,
            },
            exchange_rates: BackendSettings {
                base_url: "https://api.exchangeratesapi.io".to_string(),
                api_key: None,
            },
            http_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(60),
            cache_max_entries: 256,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Status HTTP port.
    pub status_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { status_port: 8082 }
    }
}

/// Complete price feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Streaming connection settings.
    pub stream: StreamSettings,
    /// REST client settings.
    pub api: ApiSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("PRICE_FEED_WS_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("PRICE_FEED_WS_URL".to_string()))?;
        if url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("PRICE_FEED_WS_URL".to_string()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_FEED_WS_URL".to_string(),
                reason: "must start with ws:// or wss://".to_string(),
            });
        }

        let profile = lookup("PRICE_FEED_PROFILE")
            .map(|s| FeedProfile::from_str_case_insensitive(&s))
            .unwrap_or_default();
        let base = StreamSettings::for_profile(url, profile);

        let reconnect_mode = match lookup("PRICE_FEED_RECONNECT_STRATEGY") {
            None => base.reconnect_mode,
            Some(raw) => ReconnectMode::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "PRICE_FEED_RECONNECT_STRATEGY".to_string(),
                reason: format!("unknown strategy '{raw}'"),
            })?,
        };

        let heartbeat_interval = parse_duration_secs(
            &lookup,
            "PRICE_FEED_HEARTBEAT_INTERVAL_SECS",
            base.heartbeat_interval,
        );
        if heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_FEED_HEARTBEAT_INTERVAL_SECS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let stream = StreamSettings {
            heartbeat_interval,
            idle_timeout: lookup("PRICE_FEED_IDLE_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .or(base.idle_timeout),
            reconnect_mode,
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "PRICE_FEED_RECONNECT_DELAY_INITIAL_MS",
                base.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "PRICE_FEED_RECONNECT_DELAY_MAX_SECS",
                base.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "PRICE_FEED_RECONNECT_DELAY_MULTIPLIER",
                base.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "PRICE_FEED_MAX_RECONNECT_ATTEMPTS",
                base.max_reconnect_attempts,
            ),
            ..base
        };

        let defaults = ApiSettings::default();
        let api = ApiSettings {
            api_base_url: lookup("API_BASE_URL").unwrap_or(defaults.api_base_url),
            cmc: BackendSettings {
                base_url: lookup("CMC_BASE_URL").unwrap_or(defaults.cmc.base_url),
                api_key: non_empty(&lookup, "CMC_API_KEY").map(ApiKey::new),
            },
            exchange_rates: BackendSettings {
                base_url: lookup("EXCHANGE_RATES_BASE_URL")
                    .unwrap_or(defaults.exchange_rates.base_url),
                api_key: non_empty(&lookup, "EXCHANGE_RATES_API_KEY").map(ApiKey::new),
            },
            http_timeout: parse_duration_secs(&lookup, "HTTP_TIMEOUT_SECS", defaults.http_timeout),
            cache_ttl: parse_duration_secs(&lookup, "CACHE_TTL_SECS", defaults.cache_ttl),
            cache_max_entries: parse_or(&lookup, "CACHE_MAX_ENTRIES", defaults.cache_max_entries),
        };

        let server = ServerSettings {
            status_port: parse_or(
                &lookup,
                "PRICE_FEED_STATUS_PORT",
                ServerSettings::default().status_port,
            ),
        };

        Ok(Self {
            stream,
            api,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
