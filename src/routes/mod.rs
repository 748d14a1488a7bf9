//! HTTP surface (read-only monitoring; no command endpoints).

pub mod monitor;

use axum::{routing::get, Router};

use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health",          get(monitor::health))
        .route("/api/monitor/stats",   get(monitor::get_stats))
        .route("/api/monitor/signals", get(monitor::get_signals))
        .route("/ws/monitor",          get(monitor::ws_monitor))
        .with_state(state)
}
