//! Health Check and Metrics Endpoints
//!
//! Served on the gateway HTTP port next to `/stream` and `/history`.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (feed usable or broker reachable)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::services::{FeedSnapshot, FeedState, StreamHub};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Shared broker subscription.
    pub feed: FeedSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed idle or streaming.
    Healthy,
    /// Feed being established, or last attempt failed with the broker back.
    Degraded,
    /// Last feed attempt failed and the broker is unreachable.
    Unhealthy,
}

// =============================================================================
// Health State
// =============================================================================

/// Shared state for the health endpoints.
pub struct HealthState {
    version: String,
    started_at: Instant,
    hub: StreamHub,
}

impl HealthState {
    /// Create health state for a hub.
    #[must_use]
    pub fn new(version: String, hub: StreamHub) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            hub,
        }
    }
}

/// Routes for the health endpoints.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let feed = state.hub.snapshot().state;
    let status = determine_health_status(feed, recoverable(&state, feed).await);

    if status != HealthStatus::Unhealthy {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

/// A failed feed is recoverable as long as the broker answers. Only pings
/// in that state.
async fn recoverable(state: &HealthState, feed: FeedState) -> bool {
    feed != FeedState::Failed || state.hub.ping_broker().await.is_ok()
}

async fn build_health_response(state: &HealthState) -> HealthResponse {
    let feed = state.hub.snapshot();
    let recoverable = recoverable(state, feed.state).await;
    HealthResponse {
        status: determine_health_status(feed.state, recoverable),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
    }
}

const fn determine_health_status(feed: FeedState, broker_reachable: bool) -> HealthStatus {
    match feed {
        FeedState::Idle | FeedState::Active => HealthStatus::Healthy,
        FeedState::Establishing => HealthStatus::Degraded,
        FeedState::Failed if broker_reachable => HealthStatus::Degraded,
        FeedState::Failed => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(FeedState::Idle, false => HealthStatus::Healthy ; "idle")]
    #[test_case(FeedState::Active, false => HealthStatus::Healthy ; "active")]
    #[test_case(FeedState::Establishing, false => HealthStatus::Degraded ; "establishing")]
    #[test_case(FeedState::Failed, true => HealthStatus::Degraded ; "failed with broker back")]
    #[test_case(FeedState::Failed, false => HealthStatus::Unhealthy ; "failed with broker down")]
    fn status_follows_feed(feed: FeedState, broker_reachable: bool) -> HealthStatus {
        determine_health_status(feed, broker_reachable)
    }
}
