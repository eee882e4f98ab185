//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: Opens duplex connections to the event server
//! - `TransportConnection`: One live connection (frames in, text and pings out)

use async_trait::async_trait;

use crate::domain::envelope::Endpoint;

/// A frame received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping sent by the server. The transport answers it itself.
    Ping,
    /// Reply to a ping sent by this side.
    Pong,
    /// Server initiated close, with the reason if one was given.
    Close(Option<String>),
}

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be opened.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The live connection failed.
    #[error("transport error: {0}")]
    Io(String),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

/// Opens connections to an endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn open(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn TransportConnection>, TransportError>;
}

/// A single live duplex connection.
#[async_trait]
pub trait TransportConnection: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` once the stream has ended. Must be cancel-safe: the
    /// client races it against timers and outbound traffic.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Send a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a liveness ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the ping cannot be written.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake cannot be written.
    async fn close(&mut self) -> Result<(), TransportError>;
}
