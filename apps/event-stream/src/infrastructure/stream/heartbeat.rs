//! Heartbeat Monitor
//!
//! Tracks connection liveness through periodic pings. Any inbound frame or
//! pong counts as activity; silence longer than the pong timeout while a ping
//! is outstanding marks the connection dead and triggers a reconnect.

use std::time::Duration;

use tokio::time::Instant;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Timeout for activity after a ping before the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// Error type for heartbeat operations.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    /// No activity within the pong timeout.
    #[error("heartbeat timeout after {0:?}")]
    Timeout(Duration),
}

/// Per-connection liveness state.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_activity: Instant,
    waiting_for_pong: bool,
}

impl HeartbeatMonitor {
    /// Create a monitor for a freshly opened connection.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_activity: Instant::now(),
            waiting_for_pong: false,
        }
    }

    /// Ping interval to drive the monitor with.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        self.config.ping_interval
    }

    /// Record inbound activity (a frame or a pong).
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.waiting_for_pong = false;
    }

    /// Mark that a ping has been sent.
    pub const fn mark_ping_sent(&mut self) {
        self.waiting_for_pong = true;
    }

    /// Check if we're currently waiting for a pong.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong
    }

    /// Get the time since the last inbound activity.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Check liveness on a ping tick.
    ///
    /// # Errors
    ///
    /// Returns [`HeartbeatError::Timeout`] if a ping is outstanding and no
    /// activity arrived within the pong timeout.
    pub fn check(&self) -> Result<(), HeartbeatError> {
        if self.waiting_for_pong {
            let elapsed = self.time_since_activity();
            if elapsed > self.config.pong_timeout {
                return Err(HeartbeatError::Timeout(elapsed));
            }
        }
        Ok(())
    }
}
