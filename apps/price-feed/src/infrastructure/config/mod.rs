//! Configuration Module
//!
//! Configuration loading for the price feed service.

mod settings;

pub use settings::{
    ApiKey, ApiSettings, BackendSettings, ConfigError, FeedConfig, FeedProfile, ReconnectMode,
    ServerSettings, StreamSettings,
};
