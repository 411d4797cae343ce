#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::needless_pass_by_value
    )
)]

//! Price Producer - Upstream Poller
//!
//! Polls the upstream price endpoint on a fixed interval and publishes every
//! reading to the price topic, keyed by symbol.
//!
//! # Layers (inside → outside)
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: upstream price source port
//!   - `services`: the fixed-interval poller
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: HTTP price source
//!   - `health`, `metrics`, `telemetry`, `config`
//!
//! The broker port and its adapters live in `price_bus`.
//!
//! # Data Flow
//!
//! ```text
//! Upstream ──GET every interval──► PricePoller ──publish(key = symbol)──► price-updates
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// Application
pub use application::ports::{PriceSourcePort, SourceError};
pub use application::services::{
    PollSnapshot, PollStats, PollerSettings, PricePoller, ProducerError,
};

// Infrastructure
pub use infrastructure::config::{BrokerSettings, ConfigError, ProducerConfig, UpstreamSettings};
pub use infrastructure::health::{
    HealthServer, HealthServerError, HealthServerState, HealthStatus, router as health_router,
};
pub use infrastructure::metrics::{PollOutcome, init_metrics};
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
pub use infrastructure::upstream::HttpPriceSource;
