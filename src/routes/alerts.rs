use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tracing::debug;

use super::AppState;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/alerts", get(poll))
}

/// Drain alerts raised since the previous call. Each alert is returned exactly once,
/// so a single consumer should own this endpoint.
async fn poll(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    let alerts = state.engine.write().poll_alerts();
    debug!("GET /alerts - delivering {} alerts", alerts.len());
    Json(alerts)
}
