//! Application Layer - Port definitions.
//!
//! This layer defines how the connection manager talks to the
//! streaming transport without depending on a WebSocket library.

/// Port interfaces for external systems (streaming transport).
pub mod ports;
