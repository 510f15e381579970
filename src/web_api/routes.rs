//! API Routes

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::error::Error;
use crate::models::ApiResponse;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(pipeline_status))
        .route("/api/analysis/latest", get(latest_analysis))
        .route("/api/analysis/pause", post(pause_analysis))
        .route("/api/analysis/resume", post(resume_analysis))
        .with_state(state)
}

async fn pipeline_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.orchestrator.status().await))
}

async fn latest_analysis(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let latest = state
        .orchestrator
        .latest_analysis()
        .await
        .ok_or_else(|| Error::NotFound("No analysis completed yet".to_string()))?;

    Ok(Json(ApiResponse::success(json!({
        "clip": latest.clip.file_name(),
        "text": latest.text,
        "threat_level": latest.threat_level,
        "confidence": latest.confidence,
        "keywords": latest.keywords,
        "is_threat_detected": latest.is_threat_detected(),
        "timestamp": latest.timestamp,
    }))))
}

async fn pause_analysis(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.pause_analysis().await;
    Json(ApiResponse::success(json!({ "analysis_paused": true })))
}

async fn resume_analysis(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.resume_analysis().await;
    Json(ApiResponse::success(json!({ "analysis_paused": false })))
}
