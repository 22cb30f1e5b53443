//! Session lifecycle endpoints.
//!
//! - `POST /api/sessions`: open a session
//! - `GET /api/sessions/:id`: current state
//! - `DELETE /api/sessions/:id`: drop it
//! - `PUT /api/sessions/:id/mode`: switch query mode
//! - `GET /api/sessions/:id/messages`: chat history

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parse_session_id;
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SessionView};
use crate::core_state::AccessSource;
use crate::models::{ChatMessage, QueryMode};

/// `POST /api/sessions`
pub async fn create(
    State(ctx): State<ApiContext>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    let mut sessions = ctx.core.write_sessions()?;
    let id = sessions.create();
    let view = SessionView::from(sessions.get(&id)?);
    drop(sessions);

    ctx.core
        .log_access(AccessSource::Session(id), "session_created", "session");
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /api/sessions/:id`
pub async fn view(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let id = parse_session_id(&id)?;
    let sessions = ctx.core.read_sessions()?;
    Ok(Json(SessionView::from(sessions.get(&id)?)))
}

/// `DELETE /api/sessions/:id`
pub async fn delete(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_session_id(&id)?;
    ctx.core.write_sessions()?.remove(&id)?;
    ctx.core
        .log_access(AccessSource::Session(id), "session_closed", "session");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ModeRequest {
    pub mode: QueryMode,
}

/// `PUT /api/sessions/:id/mode`
pub async fn set_mode(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(req): Json<ModeRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let id = parse_session_id(&id)?;
    let mut sessions = ctx.core.write_sessions()?;
    let session = sessions.get_mut(&id)?;
    session.set_mode(req.mode);
    tracing::debug!(session = %id, mode = req.mode.as_str(), "Query mode changed");
    Ok(Json(SessionView::from(&*session)))
}

#[derive(Serialize)]
pub struct MessagesResponse {
    pub session_id: Uuid,
    pub messages: Vec<ChatMessage>,
}

/// `GET /api/sessions/:id/messages`
pub async fn messages(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let sessions = ctx.core.read_sessions()?;
    let session = sessions.get(&id)?;
    Ok(Json(MessagesResponse {
        session_id: id,
        messages: session.messages().to_vec(),
    }))
}
