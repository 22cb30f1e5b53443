//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub roster_size: usize,
    pub active_sessions: usize,
    pub version: &'static str,
}

/// `GET /api/health`
pub async fn check(State(ctx): State<ApiContext>) -> Result<Json<HealthResponse>, ApiError> {
    let roster_size = ctx.core.roster()?.len();
    let active_sessions = ctx.core.read_sessions()?.len();

    Ok(Json(HealthResponse {
        status: "ok",
        roster_size,
        active_sessions,
        version: crate::config::APP_VERSION,
    }))
}
