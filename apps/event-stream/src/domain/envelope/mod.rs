//! Message Envelope Types
//!
//! The wire unit carried over the event connection and the endpoint it is
//! carried to.
//!
//! # Wire Format
//!
//! Every text frame is a JSON object with a `type` tag and an opaque `payload`:
//!
//! ```json
//! {"type": "price", "payload": {"symbol": "ABC", "value": 101.5}}
//! ```
//!
//! The `type` selects the dispatch route. The `payload` is never inspected by
//! the client; subscribers decode it into whatever shape they expect.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Opaque payload carried inside an envelope.
pub type Payload = serde_json::Value;

// =============================================================================
// Envelope
// =============================================================================

/// A decoded `{type, payload}` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Dispatch tag.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Opaque payload, `null` when the frame carried none.
    #[serde(default)]
    pub payload: Payload,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(message_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// Errors raised while validating an endpoint address.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// The address is not a valid URL.
    #[error("invalid endpoint URL: {0}")]
    Parse(#[from] url::ParseError),

    /// The URL scheme is not a WebSocket scheme.
    #[error("unsupported endpoint scheme '{0}', expected ws or wss")]
    UnsupportedScheme(String),
}

/// Immutable WebSocket address of the event server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parse and validate an endpoint address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not a `ws://` or `wss://` URL.
    pub fn parse(address: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(address)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
    }

    /// The endpoint as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Whether the endpoint uses TLS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Tests
// =============================================================================
