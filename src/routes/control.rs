use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use super::AppState;
use crate::coordinator::CoordinatorStatus;
use crate::engine::EngineOptions;
use crate::models::IngestStats;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/status", get(status))
        .route("/configure", get(current_options).post(configure))
}

#[derive(Serialize)]
struct StatusResponse {
    coordinator: CoordinatorStatus,
    ingest: IngestStats,
    devices: usize,
    stored_readings: usize,
    pending_alerts: usize,
    /// Pushed events waiting for the coordinator to go live.
    buffered_events: usize,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    // ---
    let coordinator = state.coordinator.status();
    let buffered_events = state.push.buffered();
    let engine = state.engine.read();
    Json(StatusResponse {
        coordinator,
        ingest: engine.stats(),
        devices: engine.get_devices().len(),
        stored_readings: engine.stored_len(),
        pending_alerts: engine.pending_alerts(),
        buffered_events,
    })
}

async fn current_options(State(state): State<AppState>) -> Json<EngineOptions> {
    Json(state.engine.read().options())
}

/// Replace retention and alert options; returns the options now in effect.
async fn configure(
    State(state): State<AppState>,
    Json(options): Json<EngineOptions>,
) -> Json<EngineOptions> {
    // ---
    info!("POST /configure - {:?}", options);
    let mut engine = state.engine.write();
    engine.configure(options);
    Json(engine.options())
}
