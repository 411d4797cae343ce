//! Application Layer - Use cases and port definitions.

/// Port interfaces for external systems (upstream price source).
pub mod ports;

/// Application services (the poller).
pub mod services;
