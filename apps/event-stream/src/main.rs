//! Event Stream Binary
//!
//! Connects to an event server, logs every event of the configured types and
//! keeps the connection alive until interrupted.
//!
//! # Usage
//!
//! ```bash
//! EVENT_STREAM_URL=ws://localhost:8000/ws EVENT_STREAM_TYPES=price,trade \
//!     cargo run --bin event-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `EVENT_STREAM_URL`: Event server WebSocket URL (`ws://` or `wss://`)
//!
//! ## Optional
//! - `EVENT_STREAM_TYPES`: Comma separated event types to log (default: none)
//! - `EVENT_STREAM_MAX_RECONNECT_ATTEMPTS`: Reconnect budget (default: 5)
//! - `EVENT_STREAM_RECONNECT_DELAY_BASE_MS`: First reconnect delay (default: 1000)
//! - `EVENT_STREAM_RECONNECT_DELAY_MAX_SECS`: Reconnect delay cap (default: 30)
//! - `EVENT_STREAM_RECONNECT_JITTER`: Upward jitter fraction (default: 0.0)
//! - `EVENT_STREAM_HEARTBEAT_INTERVAL_SECS`: Ping interval, 0 disables (default: 30)
//! - `EVENT_STREAM_HEARTBEAT_TIMEOUT_SECS`: Pong timeout (default: 60)
//! - `EVENT_STREAM_METRICS_PORT`: Prometheus metrics port, 0 disables (default: 9090)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: event-stream)
//! - `RUST_LOG`: Log filter (default: `event_stream=info`)

use std::net::SocketAddr;
use std::sync::Arc;

use event_stream::infrastructure::telemetry;
use event_stream::{
    ClientSettings, ConnectionEvent, EventStreamClient, WebSocketTransport, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting event stream client");

    let settings = ClientSettings::from_env()?;
    log_settings(&settings);

    if settings.metrics_port != 0 {
        init_metrics(SocketAddr::from(([0, 0, 0, 0], settings.metrics_port)))?;
    }

    let client = EventStreamClient::new(
        settings.client_config(),
        Arc::new(WebSocketTransport::new()),
    );

    for message_type in &settings.event_types {
        let logged_type = message_type.clone();
        let _ = client.subscribe(message_type.as_str(), move |payload| {
            tracing::info!(message_type = %logged_type, payload = %payload, "Event received");
            Ok(())
        });
    }

    let failed = CancellationToken::new();
    let failed_signal = failed.clone();
    client.on_permanent_failure(move |attempts| {
        tracing::error!(attempts, "Giving up on event stream");
        failed_signal.cancel();
    });

    tokio::spawn(log_connection_events(client.events()));

    client.connect()?;

    let exhausted = tokio::select! {
        () = await_shutdown() => false,
        () = failed.cancelled() => true,
    };

    client.disconnect();
    tracing::info!("Event stream client stopped");

    if exhausted {
        return Err("reconnect attempts exhausted".into());
    }
    Ok(())
}

/// Log lifecycle events until the client goes away.
async fn log_connection_events(mut rx: broadcast::Receiver<ConnectionEvent>) {
    loop {
        match rx.recv().await {
            Ok(ConnectionEvent::StateChanged { state, attempt }) => {
                tracing::info!(state = %state, attempt, "Connection state changed");
            }
            Ok(ConnectionEvent::ReconnectScheduled { attempt, delay }) => {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Reconnect scheduled"
                );
            }
            Ok(ConnectionEvent::PermanentFailure { attempts }) => {
                tracing::error!(attempts, "Event stream permanently failed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Lifecycle event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Log the parsed configuration.
fn log_settings(settings: &ClientSettings) {
    tracing::info!(
        url = %settings.endpoint,
        max_reconnect_attempts = settings.reconnect.max_attempts,
        metrics_port = settings.metrics_port,
        event_types = ?settings.event_types,
        "Configuration loaded"
    );
    tracing::debug!(
        delay_base_ms = settings.reconnect.delay_base.as_millis(),
        delay_max_secs = settings.reconnect.delay_max.as_secs(),
        jitter = settings.reconnect.jitter,
        heartbeat_interval_secs = settings.heartbeat.interval.as_secs(),
        heartbeat_timeout_secs = settings.heartbeat.timeout.as_secs(),
        "Reconnect and heartbeat settings"
    );
}

/// Load a .env file from the current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
