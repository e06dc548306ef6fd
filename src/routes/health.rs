// src/routes/health.rs
//! API health check endpoint for the live sensor service.
//!
//! This module defines the `/health` route used by container orchestrators
//! (e.g., Docker, Kubernetes) and CI pipelines to verify that the service is
//! running. Besides liveness it reports the stream coordinator state, so a
//! probe can tell a service still backfilling from one that has lost its
//! transport. It follows the Explicit Module Boundary Pattern (EMBP):
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::coordinator::CoordinatorState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    stream: CoordinatorState,
}

/// Handle `GET /health`.
///
/// `status` is `ok` unless the coordinator is in `ERROR` or `TERMINATED`,
/// in which case it is `degraded`. Stored data stays queryable either way.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stream = state.coordinator.state();
    let status = match stream {
        CoordinatorState::Error | CoordinatorState::Terminated => "degraded",
        _ => "ok",
    };
    Json(HealthResponse { status, stream })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
