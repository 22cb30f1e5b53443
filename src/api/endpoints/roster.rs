//! Roster maintenance endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct ReloadResponse {
    pub patients: usize,
}

/// `POST /api/roster/reload`: rebuild the roster from chunk metadata.
///
/// Sessions keep their locked patients; a failed reload leaves the
/// current roster untouched.
pub async fn reload(State(ctx): State<ApiContext>) -> Result<Json<ReloadResponse>, ApiError> {
    let core = ctx.core.clone();
    let patients = tokio::task::spawn_blocking(move || core.reload_roster()).await??;
    Ok(Json(ReloadResponse { patients }))
}
