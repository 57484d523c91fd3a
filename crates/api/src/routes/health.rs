//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::orders::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Sagas currently driven by this process.
    pub running_sagas: usize,
}

/// GET /health: liveness and the number of sagas in flight.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        running_sagas: state.orchestrator.registry().len(),
    })
}
