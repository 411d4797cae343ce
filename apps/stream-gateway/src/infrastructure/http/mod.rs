//! HTTP Surface
//!
//! One axum router serving:
//!
//! - `GET /stream` - server-sent price events
//! - `GET /history?from=<ms>&to=<ms>` - historical readings proxy
//! - the health endpoints from [`crate::infrastructure::health`]

mod history;
mod server;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};

use crate::application::ports::HistoryPort;
use crate::application::services::StreamHub;
use crate::infrastructure::health::{self, HealthState};

pub use server::{GatewayServer, ServerError};

/// State shared by the stream and history handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub owning the shared broker subscription.
    pub hub: StreamHub,
    /// History service.
    pub history: Arc<dyn HistoryPort>,
    /// SSE keep-alive comment interval (`None` = disabled).
    pub keep_alive: Option<Duration>,
}

/// Build the gateway router.
pub fn router(state: AppState, health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/stream", get(stream::stream_handler))
        .route("/history", get(history::history_handler))
        .with_state(state)
        .merge(health::router(health_state))
}
