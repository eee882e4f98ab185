//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the ambient
//! configuration, metrics and tracing setup.

/// Connection manager, codec, backoff, heartbeat and WebSocket transport.
pub mod stream;

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OpenTelemetry setup.
pub mod telemetry;
