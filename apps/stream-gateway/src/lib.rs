#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Stream Gateway - Server-Sent Price Events
//!
//! Holds one consumer-group subscription on the price topic and fans every
//! reading out to connected browsers as server-sent events. Also proxies
//! historical price queries to the history service.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Stream connection lifecycle and the connection registry
//!   - `streaming`: `Idle → Connecting → Streaming → Closed`
//!   - `subscription`: registry with non-blocking fan-out
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: history service port
//!   - `services`: the stream hub owning the shared subscription
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `http`: `/stream`, `/history` and the server
//!   - `history`: history service client
//!   - `health`, `metrics`, `telemetry`, `config`
//!
//! # Data Flow
//!
//! ```text
//!                 ┌─────────────┐     ┌─────────────┐
//! price-updates ─►│ Feed task   │────►│  Registry   │──► SSE client 1
//!  (broker)       │ (one sub)   │     │  fan-out    │──► SSE client 2
//!                 └─────────────┘     └─────────────┘──► SSE client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Stream lifecycle and connection registry.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{CloseReason, ConnectionId, StreamLifecycle, StreamState};
pub use domain::subscription::{ConnectionRegistry, FanOutReport, RegistryStats};

// Application
pub use application::ports::{HistoryError, HistoryPort, HistoryRange};
pub use application::services::{
    FeedSnapshot, FeedState, GatewayError, StreamConnection, StreamHub, StreamHubConfig,
};

// Infrastructure config
pub use infrastructure::config::{
    BrokerSettings, ConfigError, GatewayConfig, HistorySettings, ServerSettings, StreamSettings,
};

// HTTP surface (for integration tests)
pub use infrastructure::health::HealthState;
pub use infrastructure::history::HttpHistorySource;
pub use infrastructure::http::{AppState, GatewayServer, ServerError, router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
