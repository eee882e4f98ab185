#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Event Stream - Resilient Real-Time Event Client
//!
//! Maintains a single WebSocket connection to an event server, recovers from
//! drops with bounded exponential backoff and fans `{type, payload}` messages
//! out to subscribers registered per event type.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `envelope`: Wire envelope and endpoint address
//!   - `connection`: Connection states and lifecycle events
//!   - `subscription`: Per-type handler registry and dispatch
//!
//! - **Application**: Port definitions
//!   - `ports`: Transport interfaces the client drives
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: Connection manager, codec, backoff, heartbeat, WebSocket
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐     ┌───────────┐     ┌──────────────┐
//! Event server ─────►│  Transport   │────►│   Codec   │────►│   Registry   │──► handler 1
//!       ▲            │ (WebSocket)  │     │ {type,..} │     │  (per type)  │──► handler N
//!       │            └──────────────┘     └───────────┘     └──────────────┘
//!       │                   │ close / error
//!       │                   ▼
//!       └──── reconnect ◄── backoff (1s, 2s, 4s, ... ≤ cap, bounded attempts)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionEvent, ConnectionState};
pub use domain::envelope::{Endpoint, EndpointError, Envelope, Payload};
pub use domain::subscription::{
    DispatchOutcome, Handler, HandlerError, HandlerId, RegistryStats, Subscription,
    SubscriptionRegistry,
};

// Ports
pub use application::ports::{Frame, Transport, TransportConnection, TransportError};

// Client
pub use infrastructure::stream::{
    BackoffPolicy, ClientConfig, ClientError, CodecError, EventStreamClient, HeartbeatConfig,
    JsonCodec, ReconnectConfig, WebSocketTransport,
};

// Infrastructure config
pub use infrastructure::config::{ClientSettings, ConfigError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
