//! Prometheus Metrics Module
//!
//! Exposes gateway metrics in Prometheus format.
//!
//! # Metrics
//!
//! - `stream_gateway_clients`: connected stream clients
//! - `stream_gateway_messages_forwarded_total`: events handed to clients
//! - `stream_gateway_clients_dropped_total{reason}`: streams closed by the gateway
//! - `stream_gateway_subscriptions_total{outcome}`: broker subscription attempts
//! - `stream_gateway_history_requests_total{outcome}`: history proxy requests
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the gateway HTTP port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::CloseReason;

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

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_gauge!(
        "stream_gateway_clients",
        "Number of connected stream clients"
    );
    describe_counter!(
        "stream_gateway_messages_forwarded_total",
        "Total events delivered to stream clients"
    );
    describe_counter!(
        "stream_gateway_clients_dropped_total",
        "Total client streams closed by the gateway"
    );
    describe_counter!(
        "stream_gateway_subscriptions_total",
        "Total broker subscription attempts by outcome"
    );
    describe_counter!(
        "stream_gateway_history_requests_total",
        "Total history proxy requests by outcome"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Outcome of a broker subscription attempt.
#[derive(Debug, Clone, Copy)]
pub enum SubscriptionOutcome {
    /// Subscription established.
    Established,
    /// Subscription failed.
    Failed,
}

impl SubscriptionOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Established => "established",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of a history proxy request.
#[derive(Debug, Clone, Copy)]
pub enum HistoryOutcome {
    /// Upstream answered.
    Ok,
    /// Request rejected before reaching upstream.
    BadRequest,
    /// Upstream failed.
    UpstreamError,
}

impl HistoryOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::BadRequest => "bad_request",
            Self::UpstreamError => "upstream_error",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Update the connected client gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients(count: usize) {
    gauge!("stream_gateway_clients").set(count as f64);
}

/// Record events delivered by one fan-out.
pub fn record_messages_forwarded(count: u64) {
    counter!("stream_gateway_messages_forwarded_total").increment(count);
}

/// Record client streams closed by the gateway.
pub fn record_clients_dropped(reason: CloseReason, count: u64) {
    if count == 0 {
        return;
    }
    counter!(
        "stream_gateway_clients_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(count);
}

/// Record a broker subscription attempt.
pub fn record_subscription(outcome: SubscriptionOutcome) {
    counter!(
        "stream_gateway_subscriptions_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a history proxy request.
pub fn record_history_request(outcome: HistoryOutcome) {
    counter!(
        "stream_gateway_history_requests_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_outcome_as_str() {
        assert_eq!(SubscriptionOutcome::Established.as_str(), "established");
        assert_eq!(SubscriptionOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn history_outcome_as_str() {
        assert_eq!(HistoryOutcome::Ok.as_str(), "ok");
        assert_eq!(HistoryOutcome::BadRequest.as_str(), "bad_request");
        assert_eq!(HistoryOutcome::UpstreamError.as_str(), "upstream_error");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        set_clients(3);
        record_messages_forwarded(2);
        record_clients_dropped(CloseReason::SlowConsumer, 1);
        record_subscription(SubscriptionOutcome::Failed);
    }
}
