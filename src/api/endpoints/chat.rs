//! Chat endpoints.
//!
//! - `POST /api/sessions/:id/chat`: answer a question (non-streaming)
//! - `POST /api/sessions/:id/route`: routing analysis only
//!
//! Token streaming lives in `api::websocket` and shares the turn
//! helpers below.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parse_session_id;
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::core_state::{AccessSource, CoreState};
use crate::models::{patient_log_ref, ChatMessage, PatientSummary, RouteIntent, Source};
use crate::pipeline::rag::types::{AnswerRoute, ChatAnswer, ChatRequest};
use crate::pipeline::safety::sanitize_query;

#[derive(Deserialize)]
pub struct QuestionRequest {
    pub question: String,
}

// ═══════════════════════════════════════════════════════════
// Turn helpers (shared with the WebSocket handler)
// ═══════════════════════════════════════════════════════════

/// Sanitize the question and snapshot the session's mode and lock.
///
/// The session lock is released before any upstream call.
pub(crate) fn prepare_turn(
    core: &CoreState,
    session_id: Uuid,
    raw_question: &str,
) -> Result<ChatRequest, ApiError> {
    let sanitized = sanitize_query(raw_question)?;
    let sessions = core.read_sessions()?;
    let session = sessions.get(&session_id)?;
    Ok(ChatRequest {
        question: sanitized.text,
        mode: session.mode(),
        locked: session.locked().cloned(),
    })
}

/// Append the exchange to the session history and audit it.
///
/// Fails with a conflict if the locked patient changed while the
/// answer was being produced; that answer is dropped.
pub(crate) fn record_turn(
    core: &CoreState,
    session_id: Uuid,
    request: &ChatRequest,
    answer: &ChatAnswer,
) -> Result<(), ApiError> {
    {
        let mut sessions = core.write_sessions()?;
        let session = sessions.get_mut(&session_id)?;

        let locked_now = session.locked().map(|p| p.patient_id.as_str());
        let locked_then = request.locked.as_ref().map(|p| p.patient_id.as_str());
        if locked_now != locked_then {
            tracing::warn!(session = %session_id, "Patient changed during answer; dropped");
            return Err(ApiError::Conflict(
                "The locked patient changed while answering. Ask again.".into(),
            ));
        }

        session.push_message(ChatMessage::user(&request.question));
        session.push_message(ChatMessage::assistant(&answer.text, answer.sources.clone()));
    }

    let entity = match &answer.route {
        AnswerRoute::PatientRecords { patient_id } => {
            format!("patient:{}", patient_log_ref(patient_id))
        }
        AnswerRoute::GeneralDocuments => "general".to_string(),
        AnswerRoute::NoRetrieval => "none".to_string(),
    };
    core.log_access(AccessSource::Session(session_id), "chat_answered", &entity);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// POST /chat
// ═══════════════════════════════════════════════════════════

#[derive(Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub route: AnswerRoute,
    pub chunks_used: usize,
    /// Router intent, present in Auto mode.
    pub intent: Option<RouteIntent>,
}

impl From<ChatAnswer> for ChatResponse {
    fn from(a: ChatAnswer) -> Self {
        Self {
            intent: a.analysis.as_ref().map(|r| r.intent),
            answer: a.text,
            sources: a.sources,
            route: a.route,
            chunks_used: a.chunks_used,
        }
    }
}

/// `POST /api/sessions/:id/chat`
pub async fn ask(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(req): Json<QuestionRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let request = prepare_turn(&ctx.core, id, &req.question)?;

    let core = ctx.core.clone();
    let answer = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let roster = core.roster()?;
        let answer = core.pipeline(&roster).answer(&request)?;
        record_turn(&core, id, &request, &answer)?;
        Ok(answer)
    })
    .await??;

    Ok(Json(answer.into()))
}

// ═══════════════════════════════════════════════════════════
// POST /route
// ═══════════════════════════════════════════════════════════

#[derive(Serialize)]
pub struct RouteResponse {
    pub intent: RouteIntent,
    pub patient_reference: Option<String>,
    pub confidence: f32,
    pub resolved_patient: Option<PatientSummary>,
    pub candidates: Vec<PatientSummary>,
}

/// `POST /api/sessions/:id/route`: classify a question without answering it.
pub async fn route(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(req): Json<QuestionRequest>,
) -> Result<Json<RouteResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let request = prepare_turn(&ctx.core, id, &req.question)?;

    let core: Arc<CoreState> = ctx.core.clone();
    let analysis = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let roster = core.roster()?;
        Ok(core
            .pipeline(&roster)
            .analyze(&request.question, request.locked.as_ref()))
    })
    .await??;

    Ok(Json(RouteResponse {
        intent: analysis.intent,
        patient_reference: analysis.patient_reference,
        confidence: analysis.confidence,
        resolved_patient: analysis.resolved_patient.as_ref().map(PatientSummary::from),
        candidates: analysis.candidates.iter().map(PatientSummary::from).collect(),
    }))
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::testing;
    use crate::models::QueryMode;

    fn lock(core: &CoreState, id: Uuid, patient_id: &str, dob: &str) {
        let roster = core.roster().unwrap();
        let mut sessions = core.write_sessions().unwrap();
        let session = sessions.get_mut(&id).unwrap();
        session.resolve_patient(&roster, patient_id).unwrap();
        session.confirm_dob(dob).unwrap();
    }

    fn locked_session(core: &CoreState) -> Uuid {
        let id = core.write_sessions().unwrap().create();
        core.write_sessions()
            .unwrap()
            .get_mut(&id)
            .unwrap()
            .set_mode(QueryMode::PatientSpecific);
        lock(core, id, "IVF001", "1988-03-15");
        id
    }

    fn answer_about(patient_id: &str) -> ChatAnswer {
        ChatAnswer {
            text: "Letrozole 2.5 mg daily.".into(),
            sources: Vec::new(),
            route: AnswerRoute::PatientRecords {
                patient_id: patient_id.into(),
            },
            chunks_used: 1,
            analysis: None,
        }
    }

    #[test]
    fn prepare_turn_snapshots_mode_and_lock() {
        let core = testing::state();
        let id = locked_session(&core);
        let request = prepare_turn(&core, id, "  What medications?  ").unwrap();
        assert_eq!(request.question, "What medications?");
        assert_eq!(request.mode, QueryMode::PatientSpecific);
        assert_eq!(request.locked.unwrap().patient_id, "IVF001");
    }

    #[test]
    fn answer_is_recorded_when_lock_is_unchanged() {
        let core = testing::state();
        let id = locked_session(&core);
        let request = prepare_turn(&core, id, "What medications?").unwrap();

        record_turn(&core, id, &request, &answer_about("IVF001")).unwrap();

        let sessions = core.read_sessions().unwrap();
        assert_eq!(sessions.get(&id).unwrap().messages().len(), 2);
        let entries = core.audit_entries();
        let last = entries.last().unwrap();
        assert_eq!(last.action, "chat_answered");
        assert_eq!(last.entity, format!("patient:{}", patient_log_ref("IVF001")));
    }

    #[test]
    fn patient_switched_mid_answer_is_dropped() {
        let core = testing::state();
        let id = locked_session(&core);
        let request = prepare_turn(&core, id, "What medications?").unwrap();

        // Another request unlocks and locks a different patient meanwhile
        core.write_sessions()
            .unwrap()
            .get_mut(&id)
            .unwrap()
            .change_patient();
        lock(&core, id, "IVF002", "1990-07-01");

        let err = record_turn(&core, id, &request, &answer_about("IVF001")).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let sessions = core.read_sessions().unwrap();
        let session = sessions.get(&id).unwrap();
        assert_eq!(session.locked().unwrap().patient_id, "IVF002");
        assert!(session.messages().is_empty());
        assert!(core
            .audit_entries()
            .iter()
            .all(|e| e.action != "chat_answered"));
    }

    #[test]
    fn patient_unlocked_mid_answer_is_dropped() {
        let core = testing::state();
        let id = locked_session(&core);
        let request = prepare_turn(&core, id, "What medications?").unwrap();

        core.write_sessions()
            .unwrap()
            .get_mut(&id)
            .unwrap()
            .change_patient();

        let err = record_turn(&core, id, &request, &answer_about("IVF001")).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert!(core.read_sessions().unwrap().get(&id).unwrap().messages().is_empty());
    }
}
