//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Counts of frames received and frames that failed to decode
//! - **Dispatch**: Handler deliveries and handler failures by event type
//! - **Connection**: Current state, transport errors, reconnects, exhaustion
//!
//! # Integration
//!
//! The binary serves `/metrics` on `EVENT_STREAM_METRICS_PORT`. Without an
//! installed recorder every recording function is a no-op.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::connection::ConnectionState;

// =============================================================================
// Exporter
// =============================================================================

static EXPORTER_INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder and its HTTP listener.
///
/// Calling this again after a successful install is a no-op.
///
/// # Errors
///
/// Returns an error if the recorder or the listener cannot be installed.
pub fn init_metrics(listen: SocketAddr) -> Result<(), BuildError> {
    if EXPORTER_INSTALLED.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()?;

    register_metrics();
    let _ = EXPORTER_INSTALLED.set(listen);
    tracing::info!(addr = %listen, "Prometheus exporter listening");
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "event_stream_frames_received_total",
        "Total text frames received from the event server"
    );
    describe_counter!(
        "event_stream_decode_errors_total",
        "Total frames dropped because they were not valid envelopes"
    );
    describe_counter!(
        "event_stream_events_delivered_total",
        "Total successful handler invocations by event type"
    );
    describe_counter!(
        "event_stream_handler_failures_total",
        "Total handler invocations that failed or panicked by event type"
    );
    describe_counter!(
        "event_stream_transport_errors_total",
        "Total transport failures by kind"
    );
    describe_counter!(
        "event_stream_reconnects_total",
        "Total reconnection attempts scheduled"
    );
    describe_counter!(
        "event_stream_permanent_failures_total",
        "Total times the reconnect budget was exhausted"
    );
    describe_gauge!(
        "event_stream_connection_state",
        "Current connection state (0=disconnected 1=connecting 2=connected 3=reconnecting 4=failed)"
    );
    describe_gauge!(
        "event_stream_reconnect_delay_seconds",
        "Delay of the most recently scheduled reconnect"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Kind of transport failure.
#[derive(Debug, Clone, Copy)]
pub enum TransportFailure {
    /// Opening the connection failed.
    Open,
    /// The live connection errored.
    Io,
    /// The server closed the connection.
    Closed,
    /// The heartbeat timed out.
    Heartbeat,
}

impl TransportFailure {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Io => "io",
            Self::Closed => "closed",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// Record a text frame received.
pub fn record_frame_received() {
    counter!("event_stream_frames_received_total").increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("event_stream_decode_errors_total").increment(1);
}

/// Record the outcome of a dispatch round.
pub fn record_dispatch(message_type: &str, delivered: usize, failed: usize) {
    if delivered > 0 {
        counter!(
            "event_stream_events_delivered_total",
            "message_type" => message_type.to_string()
        )
        .increment(delivered as u64);
    }
    if failed > 0 {
        counter!(
            "event_stream_handler_failures_total",
            "message_type" => message_type.to_string()
        )
        .increment(failed as u64);
    }
}

/// Record a transport failure.
pub fn record_transport_error(kind: TransportFailure) {
    counter!(
        "event_stream_transport_errors_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect(delay: Duration) {
    counter!("event_stream_reconnects_total").increment(1);
    gauge!("event_stream_reconnect_delay_seconds").set(delay.as_secs_f64());
}

/// Record reconnect budget exhaustion.
pub fn record_permanent_failure() {
    counter!("event_stream_permanent_failures_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("event_stream_connection_state").set(f64::from(state.code()));
}

// =============================================================================
// Tests
// =============================================================================
