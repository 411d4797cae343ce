//! `GET /stream` handler.
//!
//! Each reading becomes one event, `data: <json>\n\n`. If the shared broker
//! subscription cannot be established the body fails immediately so the
//! client sees an aborted response instead of an idle stream.

use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use super::AppState;
use crate::application::services::GatewayError;

type EventStream = BoxStream<'static, Result<Event, GatewayError>>;

pub(super) async fn stream_handler(State(state): State<AppState>) -> Response {
    let events: EventStream = match state.hub.open_stream().await {
        Ok(connection) => connection
            .map(|item| item.map(|payload| Event::default().data(&*payload)))
            .boxed(),
        Err(e) => {
            tracing::warn!(error = %e, "Aborting stream request");
            stream::once(async move { Err(e) }).boxed()
        }
    };

    let headers = [(header::CONNECTION, HeaderValue::from_static("keep-alive"))];
    let sse = Sse::new(events);
    match state.keep_alive {
        Some(interval) => {
            let keep_alive = KeepAlive::new().interval(interval);
            (headers, sse.keep_alive(keep_alive)).into_response()
        }
        None => (headers, sse).into_response(),
    }
}
