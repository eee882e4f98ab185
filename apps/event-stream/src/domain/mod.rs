//! Domain Layer - Core event types and dispatch logic.
//!
//! This layer contains the wire envelope, the connection state machine values
//! and the subscription registry. Nothing here performs I/O.

/// Connection states and lifecycle events.
pub mod connection;

/// Message envelope and endpoint address.
pub mod envelope;

/// Handler registration and dispatch.
pub mod subscription;
