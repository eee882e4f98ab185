//! Application Layer - Port definitions.
//!
//! This layer defines how the connection manager talks to the outside world
//! without depending on a concrete WebSocket library.

/// Port interfaces for external systems (transport).
pub mod ports;
