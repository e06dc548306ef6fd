//! Live ingestion endpoint.
//!
//! `POST /events` accepts one raw reading object or an array of them and hands
//! each to the push source feeding the coordinator's live subscription. Items
//! are forwarded as-is; normalization happens in the engine. Events arriving
//! before the coordinator is live are buffered; after shutdown they are refused
//! with `503`.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::AppState;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/events", post(push))
}

#[derive(Serialize)]
struct PushResponse {
    forwarded: usize,
}

async fn push(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    // ---
    if state.coordinator.is_shutdown() {
        warn!("POST /events - refused, stream coordinator is shut down");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(PushResponse { forwarded: 0 }),
        )
            .into_response();
    }

    let items = match body {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut forwarded = 0;
    for item in items {
        if let Err(e) = state.push.push(item).await {
            warn!("POST /events - live subscription unavailable: {}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(PushResponse { forwarded }),
            )
                .into_response();
        }
        forwarded += 1;
    }

    debug!("POST /events - forwarded {} events", forwarded);
    (StatusCode::ACCEPTED, Json(PushResponse { forwarded })).into_response()
}
