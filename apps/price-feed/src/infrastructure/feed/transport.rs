//! WebSocket Transport
//!
//! `tokio-tungstenite` adapter for the [`FeedConnector`] / [`FeedTransport`]
//! ports. Supports `ws://` and `wss://` (rustls with webpki roots).
//!
//! Server pings are answered by tungstenite itself on the next read or
//! write; they surface here as [`InboundFrame::Control`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{FeedConnector, FeedTransport, InboundFrame, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections with `tokio_tungstenite::connect_async`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedTransport>, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WsTransport { stream }))
    }
}

/// An open WebSocket connection.
pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Some(Ok(InboundFrame::Text(text.as_str().to_owned()))),
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Server sent close frame");
                None
            }
            Some(Ok(_)) => Some(Ok(InboundFrame::Control)),
            Some(Err(e)) => Some(Err(TransportError::Receive(e.to_string()))),
            None => None,
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}
