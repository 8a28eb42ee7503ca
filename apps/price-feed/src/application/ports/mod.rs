//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedConnector`: opens a streaming connection to the price feed
//! - `FeedTransport`: one open connection (send text, receive frames, close)

use async_trait::async_trait;

/// Errors raised by a streaming transport.
///
/// All variants are treated the same way by the connection manager: the
/// connection is considered lost and a reconnect is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),
    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),
}

/// A frame received from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// UTF-8 text payload.
    Text(String),
    /// Any non-text frame (binary, ping, pong). Counts as liveness only.
    Control,
}

/// Opens connections to the streaming endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Open a new connection to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedTransport>, TransportError>;
}

/// One open streaming connection.
#[async_trait]
pub trait FeedTransport: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next frame.
    ///
    /// Returns `None` once the peer has closed the connection. Must be
    /// cancel-safe: it is polled inside `tokio::select!`.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>>;

    /// Close the connection. Errors are ignored.
    async fn close(&mut self);
}
