//! Event Stream Infrastructure
//!
//! The connection manager and its collaborators.
//!
//! # Components
//!
//! - [`client`]: Connection lifecycle, reconnection and dispatch
//! - [`codec`]: `{type, payload}` envelope decoding and encoding
//! - [`reconnect`]: Bounded exponential backoff
//! - [`heartbeat`]: Optional ping-based liveness monitoring
//! - [`websocket`]: `tokio-tungstenite` transport adapter

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod reconnect;
pub mod websocket;

pub use client::{ClientConfig, ClientError, EventStreamClient, PermanentFailureCallback};
pub use codec::{CodecError, JsonCodec};
pub use heartbeat::{HeartbeatConfig, HeartbeatError, HeartbeatMonitor};
pub use reconnect::{BackoffPolicy, ReconnectConfig};
pub use websocket::{WebSocketConnection, WebSocketTransport};
