use axum::{
    extract::Path, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};

use super::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/snapshot", get(global))
        .route("/snapshot/{device_id}", get(device))
}

async fn global(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.read().get_global_snapshot())
}

/// Per-device aggregate, 404 if the device has never reported.
async fn device(Path(device_id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    // ---
    match state.engine.read().get_snapshot(&device_id) {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(format!("no data for device '{device_id}'")),
        )
            .into_response(),
    }
}
