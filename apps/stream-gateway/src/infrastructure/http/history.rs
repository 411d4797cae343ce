//! `GET /history` handler.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::AppState;
use crate::application::ports::{HistoryError, HistoryRange};
use crate::infrastructure::metrics::{self, HistoryOutcome};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

pub(super) async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let range = HistoryRange::parse(
        params.get("from").map(String::as_str),
        params.get("to").map(String::as_str),
    );

    let result = match range {
        Ok(range) => state.history.fetch_range(range).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(readings) => {
            metrics::record_history_request(HistoryOutcome::Ok);
            Json(readings).into_response()
        }
        Err(e) => error_response(&e),
    }
}

fn error_response(error: &HistoryError) -> Response {
    let status = if error.is_client_error() {
        tracing::debug!(error = %error, "Rejected history request");
        metrics::record_history_request(HistoryOutcome::BadRequest);
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(error = %error, "Error fetching historical data");
        metrics::record_history_request(HistoryOutcome::UpstreamError);
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (
        status,
        Json(ErrorBody {
            error: error.client_message(),
        }),
    )
        .into_response()
}
