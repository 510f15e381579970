//! WebAPI - Status endpoints
//!
//! ## Responsibilities
//!
//! - Liveness and pipeline status
//! - Latest analysis
//! - Operator pause/resume of analysis consumption

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let profile = state.backend.profile();

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        stream_connected: state.orchestrator.status().await.stream_connected,
        backend_mode: profile.mode.as_str().to_string(),
        backend_model: profile.model,
    };

    Json(response)
}
