//! Client Configuration Settings
//!
//! Configuration types for the event stream client, loaded from environment
//! variables.

use std::time::Duration;

use crate::domain::envelope::{Endpoint, EndpointError};
use crate::infrastructure::stream::{ClientConfig, HeartbeatConfig, ReconnectConfig};

/// Upper bound for heartbeat durations read from the environment.
const MAX_HEARTBEAT: Duration = Duration::from_secs(24 * 60 * 60);

/// Reconnection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Delay before the first reconnection attempt.
    pub delay_base: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Upward jitter fraction applied to each delay (0 = none).
    pub jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = never reconnect).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_base: Duration::from_millis(1000),
            delay_max: Duration::from_secs(30),
            jitter: 0.0,
            max_attempts: 5,
        }
    }
}

/// Heartbeat settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Ping interval (zero disables heartbeats).
    pub interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub timeout: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Channel capacity settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
    /// Capacity of the outbound message queue.
    pub outbound_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            outbound_capacity: 256,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Event server address.
    pub endpoint: Endpoint,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatSettings,
    /// Channel capacities.
    pub channels: ChannelSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// Event types the binary subscribes to and logs.
    pub event_types: Vec<String>,
}

impl ClientSettings {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `EVENT_STREAM_URL` is missing, empty or not a
    /// `ws`/`wss` URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unparseable optional values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is missing, empty or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("EVENT_STREAM_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("EVENT_STREAM_URL".to_string()))?;

        if url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("EVENT_STREAM_URL".to_string()));
        }

        let endpoint = Endpoint::parse(url.trim())?;

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            delay_base: parse_duration_millis(
                &lookup,
                "EVENT_STREAM_RECONNECT_DELAY_BASE_MS",
                reconnect_defaults.delay_base,
            ),
            delay_max: parse_duration_secs(
                &lookup,
                "EVENT_STREAM_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.delay_max,
            ),
            jitter: parse_jitter(
                &lookup,
                "EVENT_STREAM_RECONNECT_JITTER",
                reconnect_defaults.jitter,
            ),
            max_attempts: parse_value(
                &lookup,
                "EVENT_STREAM_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        };

        let heartbeat_defaults = HeartbeatSettings::default();
        let heartbeat = HeartbeatSettings {
            interval: parse_duration_secs(
                &lookup,
                "EVENT_STREAM_HEARTBEAT_INTERVAL_SECS",
                heartbeat_defaults.interval,
            )
            .min(MAX_HEARTBEAT),
            timeout: parse_duration_secs(
                &lookup,
                "EVENT_STREAM_HEARTBEAT_TIMEOUT_SECS",
                heartbeat_defaults.timeout,
            )
            .min(MAX_HEARTBEAT),
        };

        let channel_defaults = ChannelSettings::default();
        let channels = ChannelSettings {
            event_capacity: parse_value(
                &lookup,
                "EVENT_STREAM_EVENT_CAPACITY",
                channel_defaults.event_capacity,
            ),
            outbound_capacity: parse_value(
                &lookup,
                "EVENT_STREAM_OUTBOUND_CAPACITY",
                channel_defaults.outbound_capacity,
            ),
        };

        let metrics_port = parse_value(&lookup, "EVENT_STREAM_METRICS_PORT", 9090);

        let event_types = lookup("EVENT_STREAM_TYPES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            endpoint,
            reconnect,
            heartbeat,
            channels,
            metrics_port,
            event_types,
        })
    }

    /// Build the client configuration described by these settings.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        let reconnect = ReconnectConfig::new(
            self.reconnect.delay_base,
            self.reconnect.delay_max,
            self.reconnect.jitter,
            self.reconnect.max_attempts,
        );

        let mut config = ClientConfig::new(self.endpoint.clone())
            .with_reconnect(reconnect)
            .with_event_capacity(self.channels.event_capacity)
            .with_outbound_capacity(self.channels.outbound_capacity);

        if !self.heartbeat.interval.is_zero() {
            config = config.with_heartbeat(HeartbeatConfig::new(
                self.heartbeat.interval,
                self.heartbeat.timeout,
            ));
        }

        config
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// The endpoint is not a usable WebSocket URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),
}

fn parse_value<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Jitter fraction in `[0, 1]`; non-finite values fall back to the default.
fn parse_jitter<F>(lookup: &F, key: &str, default: f64) -> f64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map_or(default, |v| v.clamp(0.0, 1.0))
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<ClientSettings, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_url_is_error() {
        let result = settings_from(&[]);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(key)) if key == "EVENT_STREAM_URL"));
    }

    #[test]
    fn empty_url_is_error() {
        let result = settings_from(&[("EVENT_STREAM_URL", "  ")]);
        assert!(matches!(result, Err(ConfigError::EmptyValue(_))));
    }

    #[test]
    fn non_websocket_url_is_error() {
        let result = settings_from(&[("EVENT_STREAM_URL", "http://localhost:8000/ws")]);
        assert!(matches!(result, Err(ConfigError::InvalidEndpoint(_))));
    }

    #[test]
    fn defaults_applied() {
        let settings = settings_from(&[("EVENT_STREAM_URL", "ws://localhost:8000/ws")])
            .expect("valid settings");

        assert_eq!(settings.endpoint.as_str(), "ws://localhost:8000/ws");
        assert_eq!(settings.reconnect, ReconnectSettings::default());
        assert_eq!(settings.heartbeat, HeartbeatSettings::default());
        assert_eq!(settings.channels, ChannelSettings::default());
        assert_eq!(settings.metrics_port, 9090);
        assert!(settings.event_types.is_empty());
    }

    #[test]
    fn overrides_parsed() {
        let settings = settings_from(&[
            ("EVENT_STREAM_URL", "wss://events.example.com/ws"),
            ("EVENT_STREAM_MAX_RECONNECT_ATTEMPTS", "3"),
            ("EVENT_STREAM_RECONNECT_DELAY_BASE_MS", "250"),
            ("EVENT_STREAM_RECONNECT_DELAY_MAX_SECS", "10"),
            ("EVENT_STREAM_RECONNECT_JITTER", "0.2"),
            ("EVENT_STREAM_HEARTBEAT_INTERVAL_SECS", "0"),
            ("EVENT_STREAM_METRICS_PORT", "0"),
            ("EVENT_STREAM_TYPES", "price, trade,,news "),
        ])
        .expect("valid settings");

        assert_eq!(settings.reconnect.max_attempts, 3);
        assert_eq!(settings.reconnect.delay_base, Duration::from_millis(250));
        assert_eq!(settings.reconnect.delay_max, Duration::from_secs(10));
        assert!((settings.reconnect.jitter - 0.2).abs() < f64::EPSILON);
        assert!(settings.heartbeat.interval.is_zero());
        assert_eq!(settings.metrics_port, 0);
        assert_eq!(settings.event_types, vec!["price", "trade", "news"]);
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let settings = settings_from(&[
            ("EVENT_STREAM_URL", "ws://localhost:8000/ws"),
            ("EVENT_STREAM_MAX_RECONNECT_ATTEMPTS", "many"),
            ("EVENT_STREAM_RECONNECT_DELAY_BASE_MS", "-5"),
        ])
        .expect("valid settings");

        assert_eq!(settings.reconnect.max_attempts, 5);
        assert_eq!(settings.reconnect.delay_base, Duration::from_secs(1));
    }

    #[test_case("NaN" ; "nan")]
    #[test_case("inf" ; "infinite")]
    #[test_case("-infinity" ; "negative infinite")]
    fn non_finite_jitter_falls_back_to_default(raw: &str) {
        let settings = settings_from(&[
            ("EVENT_STREAM_URL", "ws://localhost:8000/ws"),
            ("EVENT_STREAM_RECONNECT_JITTER", raw),
        ])
        .expect("valid settings");

        assert!(settings.reconnect.jitter.abs() < f64::EPSILON);
        assert!(settings.client_config().reconnect.jitter_factor.is_finite());
    }

    #[test_case("-0.5", 0.0 ; "negative")]
    #[test_case("3", 1.0 ; "above one")]
    fn jitter_is_clamped(raw: &str, expected: f64) {
        let settings = settings_from(&[
            ("EVENT_STREAM_URL", "ws://localhost:8000/ws"),
            ("EVENT_STREAM_RECONNECT_JITTER", raw),
        ])
        .expect("valid settings");

        assert!((settings.reconnect.jitter - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn huge_heartbeat_values_are_capped() {
        let settings = settings_from(&[
            ("EVENT_STREAM_URL", "ws://localhost:8000/ws"),
            ("EVENT_STREAM_HEARTBEAT_INTERVAL_SECS", "18446744073709551615"),
            ("EVENT_STREAM_HEARTBEAT_TIMEOUT_SECS", "18446744073709551615"),
        ])
        .expect("valid settings");

        assert_eq!(settings.heartbeat.interval, MAX_HEARTBEAT);
        assert_eq!(settings.heartbeat.timeout, MAX_HEARTBEAT);
        assert_eq!(
            settings.client_config().heartbeat,
            Some(HeartbeatConfig::new(MAX_HEARTBEAT, MAX_HEARTBEAT))
        );
    }

    #[test]
    fn client_config_carries_settings() {
        let settings = settings_from(&[
            ("EVENT_STREAM_URL", "ws://localhost:8000/ws"),
            ("EVENT_STREAM_MAX_RECONNECT_ATTEMPTS", "7"),
        ])
        .expect("valid settings");

        let config = settings.client_config();
        assert_eq!(config.reconnect.max_attempts, 7);
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));
        assert_eq!(
            config.heartbeat,
            Some(HeartbeatConfig::new(
                Duration::from_secs(30),
                Duration::from_secs(60)
            ))
        );
    }

    #[test]
    fn zero_heartbeat_interval_disables_heartbeat() {
        let settings = settings_from(&[
            ("EVENT_STREAM_URL", "ws://localhost:8000/ws"),
            ("EVENT_STREAM_HEARTBEAT_INTERVAL_SECS", "0"),
        ])
        .expect("valid settings");

        assert!(settings.client_config().heartbeat.is_none());
    }
}
