//! Prometheus Metrics Module
//!
//! # Metrics
//!
//! - `price_producer_polls_total{outcome}`: ticks by outcome
//! - `price_producer_poll_seconds`: fetch plus publish latency
//! - `price_producer_last_published_timestamp_ms`: timestamp of the last published reading
//!
//! Rendered at `/metrics` on the producer health port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const POLL_SECONDS: &str = "price_producer_poll_seconds";

/// Histogram buckets for poll latency, upper bound near the upstream timeout.
const POLL_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0];

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .set_buckets_for_metric(Matcher::Full(POLL_SECONDS.to_string()), POLL_BUCKETS)
                .expect("poll latency buckets are non-empty")
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

fn register_metrics() {
    describe_counter!("price_producer_polls_total", "Total poll ticks by outcome");
    describe_histogram!(
        POLL_SECONDS,
        metrics::Unit::Seconds,
        "Time spent fetching and publishing one reading"
    );
    describe_gauge!(
        "price_producer_last_published_timestamp_ms",
        "Timestamp of the most recently published reading"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Reading published.
    Published,
    /// Upstream unreachable or non-success status.
    FetchFailed,
    /// Upstream payload unusable.
    ParseFailed,
    /// Broker rejected the reading.
    PublishFailed,
}

impl PollOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::FetchFailed => "fetch_failed",
            Self::ParseFailed => "parse_failed",
            Self::PublishFailed => "publish_failed",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a completed poll.
pub fn record_poll(outcome: PollOutcome, elapsed: Duration) {
    counter!("price_producer_polls_total", "outcome" => outcome.as_str()).increment(1);
    histogram!(POLL_SECONDS).record(elapsed.as_secs_f64());
}

/// Update the last published gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_last_published(timestamp_ms: i64) {
    gauge!("price_producer_last_published_timestamp_ms").set(timestamp_ms as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(PollOutcome::Published.as_str(), "published");
        assert_eq!(PollOutcome::FetchFailed.as_str(), "fetch_failed");
        assert_eq!(PollOutcome::ParseFailed.as_str(), "parse_failed");
        assert_eq!(PollOutcome::PublishFailed.as_str(), "publish_failed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_poll(PollOutcome::Published, Duration::from_millis(12));
        set_last_published(1_700_000_000_000);
    }
}
