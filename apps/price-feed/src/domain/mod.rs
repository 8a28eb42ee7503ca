//! Domain Layer - Core price types and the shared store.
//!
//! This layer contains the connection state, tick payload and the
//! reactive price store. Nothing here performs I/O.

/// Price streaming types (connection state, ticks).
pub mod streaming;

/// Shared last-known price store.
pub mod store;
