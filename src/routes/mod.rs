//! HTTP gateway for the live sensor core.
//!
//! Follows the Explicit Module Boundary Pattern (EMBP): each sibling module
//! exports a subrouter over [`AppState`], and this gateway merges them so
//! `main.rs` only ever calls [`router`].

use axum::Router;

use crate::coordinator::CoordinatorHandle;
use crate::engine::SharedEngine;
use crate::transport::PushSource;

mod alerts;
mod control;
mod events;
mod health;
mod readings;
mod snapshot;

// ---

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub engine: SharedEngine,
    pub push: PushSource,
    pub coordinator: CoordinatorHandle,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(snapshot::router())
        .merge(alerts::router())
        .merge(control::router())
        .merge(events::router())
        .merge(health::router())
        .with_state(state)
}
