//! Connection Lifecycle Types
//!
//! The connection state machine values and the lifecycle events the client
//! publishes to its owner.

use std::fmt;
use std::time::Duration;

/// State of the single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection and no pending reconnect.
    #[default]
    Disconnected,
    /// Transport open in progress.
    Connecting,
    /// Transport open, frames flowing.
    Connected,
    /// Waiting for the backoff timer before the next open.
    Reconnecting,
    /// Reconnect budget exhausted; needs a manual `connect`.
    PermanentlyFailed,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::PermanentlyFailed => "permanently_failed",
        }
    }

    /// Whether a session is live or being established.
    ///
    /// `connect` is a no-op in these states.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Numeric code used for the state gauge.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
            Self::PermanentlyFailed => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events published by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The state machine moved to a new state.
    StateChanged {
        /// State entered.
        state: ConnectionState,
        /// Reconnect attempt counter after the transition.
        attempt: u32,
    },
    /// A reconnect timer was armed.
    ReconnectScheduled {
        /// Attempt number this timer belongs to (1-based).
        attempt: u32,
        /// Delay before the next open.
        delay: Duration,
    },
    /// Reconnect budget exhausted.
    PermanentFailure {
        /// Number of reconnects that were attempted.
        attempts: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn only_connecting_and_connected_are_active() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Connected.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::Reconnecting.is_active());
        assert!(!ConnectionState::PermanentlyFailed.is_active());
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::PermanentlyFailed.as_str(),
            "permanently_failed"
        );
    }
}
