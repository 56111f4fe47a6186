//! Health Routes
//!
//! - GET /healthz - Liveness probe, fixed body
//! - GET /health - Component status

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /health
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pool = state.pool.stats().await.ok();
    let live = state.live.stats().await.ok();

    Json(HealthResponse {
        status: "ok".to_string(),
        files: state.catalog.files().len(),
        pool,
        live,
        sockets: state.open_sockets(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
