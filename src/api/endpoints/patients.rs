//! Patient selection endpoints.
//!
//! Selection is two-step: `resolve` finds a pending patient from an ID
//! fragment or name, `confirm` locks it once the DOB matches. `change`
//! unlocks and clears the session history.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::parse_session_id;
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SessionView};
use crate::core_state::AccessSource;
use crate::models::{PatientSummary, ResolveReason};
use crate::session_cache::DobOutcome;

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub query: String,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub reason: ResolveReason,
    pub patient: Option<PatientSummary>,
    pub candidates: Vec<PatientSummary>,
    pub session: SessionView,
}

/// `POST /api/sessions/:id/patient/resolve`
pub async fn resolve(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let roster = ctx.core.roster()?;

    let mut sessions = ctx.core.write_sessions()?;
    let session = sessions.get_mut(&id)?;
    let resolution = session.resolve_patient(&roster, &req.query)?;

    Ok(Json(ResolveResponse {
        reason: resolution.reason,
        patient: resolution.patient.as_ref().map(PatientSummary::from),
        candidates: resolution.candidates.iter().map(PatientSummary::from).collect(),
        session: SessionView::from(&*session),
    }))
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub dob: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Locked,
    Mismatch,
    AttemptsExhausted,
}

#[derive(Serialize)]
pub struct ConfirmResponse {
    pub outcome: ConfirmOutcome,
    pub attempts_left: Option<u32>,
    pub session: SessionView,
}

/// `POST /api/sessions/:id/patient/confirm`
pub async fn confirm(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let id = parse_session_id(&id)?;

    let (response, locked_ref) = {
        let mut sessions = ctx.core.write_sessions()?;
        let session = sessions.get_mut(&id)?;
        let outcome = session.confirm_dob(&req.dob)?;

        let (outcome, attempts_left, locked_ref) = match outcome {
            DobOutcome::Locked(patient) => (ConfirmOutcome::Locked, None, Some(patient.log_ref())),
            DobOutcome::Mismatch { attempts_left } => {
                (ConfirmOutcome::Mismatch, Some(attempts_left), None)
            }
            DobOutcome::AttemptsExhausted => (ConfirmOutcome::AttemptsExhausted, Some(0), None),
        };
        let response = ConfirmResponse {
            outcome,
            attempts_left,
            session: SessionView::from(&*session),
        };
        (response, locked_ref)
    };

    match &locked_ref {
        Some(patient) => ctx
            .core
            .log_access(AccessSource::Session(id), "patient_locked", patient),
        None => ctx.core.log_access(
            AccessSource::Session(id),
            "patient_confirm_failed",
            "dob_mismatch",
        ),
    }

    Ok(Json(response))
}

/// `POST /api/sessions/:id/patient/change`
pub async fn change(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let id = parse_session_id(&id)?;

    let (view, unlocked) = {
        let mut sessions = ctx.core.write_sessions()?;
        let session = sessions.get_mut(&id)?;
        let unlocked = session.locked().map(|p| p.log_ref());
        session.change_patient();
        (SessionView::from(&*session), unlocked)
    };

    if let Some(patient) = unlocked {
        ctx.core
            .log_access(AccessSource::Session(id), "patient_unlocked", &patient);
    }
    Ok(Json(view))
}
