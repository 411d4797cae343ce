//! Port Interfaces
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceSourcePort`: the upstream current-price endpoint
//!
//! Publishing goes through the `price_bus::Broker` port.

use async_trait::async_trait;
use price_bus::PriceReading;

/// Upstream fetch error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Request could not be completed (connect, timeout, reset).
    #[error("upstream request failed: {message}")]
    Network {
        /// Error details.
        message: String,
    },

    /// Upstream answered with a non-success status.
    #[error("upstream returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        message: String,
    },

    /// Response body was not a usable price quote.
    #[error("upstream payload invalid: {message}")]
    Parse {
        /// Error details.
        message: String,
    },
}

/// Port for the upstream current-price source.
#[async_trait]
pub trait PriceSourcePort: Send + Sync {
    /// Fetch the current reading.
    async fn fetch(&self) -> Result<PriceReading, SourceError>;
}
