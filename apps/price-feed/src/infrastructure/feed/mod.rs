//! Price Stream Adapters
//!
//! The reconnecting WebSocket client that feeds the price store:
//!
//! - **manager**: connection lifecycle, reconnect loop, tick dispatch
//! - **transport**: `tokio-tungstenite` implementation of the feed ports
//! - **codec**: JSON tick decoding and the ping payload
//! - **heartbeat** / **reconnect**: timers driven by the manager

pub mod codec;
pub mod heartbeat;
pub mod manager;
pub mod reconnect;
pub mod transport;

pub use codec::{CodecError, TickCodec};
pub use heartbeat::{
    HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState, MIN_PING_INTERVAL,
};
pub use manager::{ConnectionManager, FeedClientConfig, FeedClientError, FeedEvent};
pub use reconnect::{BackoffStrategy, ReconnectConfig, ReconnectPolicy};
pub use transport::{WsConnector, WsTransport};
