//! WebSocket Transport
//!
//! `tokio-tungstenite` adapter for the [`Transport`] port. Supports `ws://`
//! and `wss://` endpoints (TLS via rustls with webpki roots).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{Frame, Transport, TransportConnection, TransportError};
use crate::domain::envelope::Endpoint;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn TransportConnection>, TransportError> {
        tracing::debug!(url = %endpoint, "Opening WebSocket");

        let (stream, response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

/// A live WebSocket connection.
pub struct WebSocketConnection {
    stream: WsStream,
}

#[async_trait]
impl TransportConnection for WebSocketConnection {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(map_error(e))),
            };

            let frame = match message {
                Message::Text(text) => Frame::Text(text.to_string()),
                Message::Binary(data) => Frame::Binary(data.to_vec()),
                // tungstenite queues the pong reply itself
                Message::Ping(_) => Frame::Ping,
                Message::Pong(_) => Frame::Pong,
                Message::Close(close) => Frame::Close(close.map(|c| c.reason.to_string())),
                Message::Frame(_) => continue,
            };

            return Some(Ok(frame));
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(map_error)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.stream
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(map_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }
}

fn map_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::Io(other.to_string()),
    }
}
