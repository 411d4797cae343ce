//! Infrastructure Layer - Adapters for external systems.

/// Environment configuration.
pub mod config;

/// Health and metrics HTTP server.
pub mod health;

/// Prometheus metrics.
pub mod metrics;

/// Tracing and OpenTelemetry setup.
pub mod telemetry;

/// Upstream price endpoint adapter.
pub mod upstream;
