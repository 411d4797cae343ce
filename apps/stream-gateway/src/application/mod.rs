//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the stream hub that owns the shared broker
//! subscription and the port the history proxy depends on.

/// Port interfaces for external systems (history service).
pub mod ports;

/// Application services (stream hub).
pub mod services;
