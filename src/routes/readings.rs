use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use super::AppState;
use crate::engine::SeriesQuery;
use crate::store::{RecentWindow, TimeRange};

// ---

const DEFAULT_LIMIT: usize = 1000;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/readings", get(readings))
        .route("/devices", get(devices))
        .route("/latest", get(latest))
}

/// Query parameters for filtering sensor readings
#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQuery {
    device_id: Option<String>,
    /// Timestamp range filter, inclusive (e.g., "1700000000,1700086400"; either side may be empty)
    timestamp_range: Option<String>,
    /// Received-at window: all, day, week or month
    window: Option<RecentWindow>,
    limit: Option<usize>,
}

async fn readings(
    Query(params): Query<ReadingsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    info!("GET /readings - {:?}", params);

    let range = match params.timestamp_range.as_deref().map(parse_range).transpose() {
        Ok(range) => range,
        Err(msg) => return (StatusCode::BAD_REQUEST, Json(msg)).into_response(),
    };

    let query = SeriesQuery {
        device_id: params.device_id,
        range,
        window: params.window.unwrap_or_default(),
        limit: Some(params.limit.unwrap_or(DEFAULT_LIMIT)),
    };

    let readings = state.engine.read().find_series(&query, Utc::now());
    debug!("GET /readings - returning {} readings", readings.len());
    (StatusCode::OK, Json(readings)).into_response()
}

async fn devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.read().get_devices())
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    device_id: Option<String>,
}

async fn latest(
    Query(params): Query<LatestQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    match state.engine.read().latest(params.device_id.as_deref()) {
        Some(reading) => (StatusCode::OK, Json(reading)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Parse "start,end" into a [`TimeRange`].
fn parse_range(raw: &str) -> Result<TimeRange, String> {
    // ---
    let (start, end) = raw
        .split_once(',')
        .ok_or_else(|| format!("timestamp_range must be 'start,end', got '{raw}'"))?;

    let bound = |s: &str| -> Result<Option<i64>, String> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        s.parse::<i64>()
            .map(Some)
            .map_err(|e| format!("invalid timestamp_range bound '{s}': {e}"))
    };

    Ok(TimeRange {
        start: bound(start)?,
        end: bound(end)?,
    })
}
