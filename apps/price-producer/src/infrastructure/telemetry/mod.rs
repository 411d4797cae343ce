//! Tracing Setup
//!
//! Producer service name and log filter defaults for
//! [`price_bus::telemetry`]. `OTEL_*` and `RUST_LOG` behave as documented
//! there.

pub use price_bus::telemetry::{TelemetryConfig, TelemetryError, TelemetryGuard};

/// Service name reported when `OTEL_SERVICE_NAME` is unset.
pub const SERVICE_NAME: &str = "price-producer";

/// Filter directives applied before `RUST_LOG`.
const DIRECTIVES: &[&str] = &["price_producer=info", "reqwest=warn"];

/// Initialize telemetry from the environment.
///
/// # Errors
///
/// Returns `TelemetryError` if the filter, exporter or global subscriber
/// cannot be set up.
pub fn init() -> Result<TelemetryGuard, TelemetryError> {
    price_bus::telemetry::init(SERVICE_NAME, DIRECTIVES)
}
