//! Domain Layer - Stream lifecycle and connection tracking.
//!
//! Pure types describing client stream connections and the registry that
//! fans readings out to them. Nothing here talks to the network.

/// Stream connection lifecycle (state machine).
pub mod streaming;

/// Connection registry and fan-out.
pub mod subscription;
