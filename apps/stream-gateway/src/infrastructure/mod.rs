//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the HTTP surface,
//! configuration and observability.

/// Configuration loading.
pub mod config;

/// Health, readiness and metrics endpoints.
pub mod health;

/// History service HTTP client.
pub mod history;

/// HTTP server, SSE stream and history proxy handlers.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
