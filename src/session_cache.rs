//! Chat sessions: per-client patient lock state and history.
//!
//! Each session walks the same small state machine:
//! no patient → pending (resolved, unverified) → locked (DOB confirmed).
//! A locked patient stays locked until `change_patient`. Sessions live in
//! memory only and are evicted after an idle timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::identity::{fuzzy_resolve, verify_dob, Resolution, Roster, MAX_DOB_ATTEMPTS};
use crate::models::{ChatMessage, PatientRecord, QueryMode, ResolveReason, StatusLevel};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    #[error("A patient is already locked. Change patient first.")]
    PatientLocked,

    #[error("No patient pending confirmation")]
    NoPendingPatient,
}

/// Resolution feedback shown next to the patient search box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveStatus {
    pub level: StatusLevel,
    pub text: String,
}

impl ResolveStatus {
    fn new(level: StatusLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

/// Outcome of a DOB confirmation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DobOutcome {
    Locked(PatientRecord),
    Mismatch { attempts_left: u32 },
    /// Too many failures for this patient in this session; the pending
    /// patient was discarded and cannot be confirmed here again.
    AttemptsExhausted,
}

// ═══════════════════════════════════════════════════════════
// ChatSession
// ═══════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ChatSession {
    id: Uuid,
    mode: QueryMode,
    locked: Option<PatientRecord>,
    pending: Option<PatientRecord>,
    candidates: Vec<PatientRecord>,
    status: Option<ResolveStatus>,
    messages: Vec<ChatMessage>,
    /// Failed DOB attempts per patient id. Survives re-resolving.
    dob_failures: HashMap<String, u32>,
    created_at: DateTime<Utc>,
    last_activity: Instant,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            mode: QueryMode::default(),
            locked: None,
            pending: None,
            candidates: Vec::new(),
            status: None,
            messages: Vec::new(),
            dob_failures: HashMap::new(),
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn locked(&self) -> Option<&PatientRecord> {
        self.locked.as_ref()
    }

    pub fn pending(&self) -> Option<&PatientRecord> {
        self.pending.as_ref()
    }

    pub fn candidates(&self) -> &[PatientRecord] {
        &self.candidates
    }

    pub fn status(&self) -> Option<&ResolveStatus> {
        self.status.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Failed DOB attempts against the pending patient.
    pub fn dob_attempts(&self) -> u32 {
        self.pending
            .as_ref()
            .and_then(|p| self.dob_failures.get(&p.patient_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn set_mode(&mut self, mode: QueryMode) {
        self.mode = mode;
        self.touch();
    }

    /// Look up a patient from free text. Only allowed while nothing is locked.
    pub fn resolve_patient(
        &mut self,
        roster: &Roster,
        query: &str,
    ) -> Result<Resolution, SessionError> {
        if self.locked.is_some() {
            return Err(SessionError::PatientLocked);
        }
        self.touch();

        let resolution = fuzzy_resolve(roster, query);

        if query.trim().is_empty() {
            self.pending = None;
            self.status = None;
            self.candidates.clear();
            return Ok(resolution);
        }

        match (&resolution.patient, resolution.reason) {
            (Some(patient), _) => {
                self.status = Some(ResolveStatus::new(
                    StatusLevel::Info,
                    format!(
                        "Detected: **{} {}** (`{}`)",
                        patient.first_name, patient.last_name, patient.patient_id
                    ),
                ));
                self.pending = Some(patient.clone());
                self.candidates.clear();
                tracing::info!(
                    session = %self.id,
                    patient = %patient.log_ref(),
                    reason = resolution.reason.as_str(),
                    "Patient pending confirmation"
                );
            }
            (None, ResolveReason::Ambiguous) => {
                self.pending = None;
                self.status = Some(ResolveStatus::new(
                    StatusLevel::Warning,
                    "Multiple matches found",
                ));
                self.candidates = resolution.candidates.clone();
                tracing::info!(
                    session = %self.id,
                    candidates = self.candidates.len(),
                    "Patient reference ambiguous"
                );
            }
            (None, _) => {
                self.pending = None;
                self.status = Some(ResolveStatus::new(
                    StatusLevel::Error,
                    "No match found. Try again.",
                ));
                self.candidates.clear();
            }
        }
        Ok(resolution)
    }

    /// Check the typed DOB against the pending patient.
    pub fn confirm_dob(&mut self, input: &str) -> Result<DobOutcome, SessionError> {
        if self.locked.is_some() {
            return Err(SessionError::PatientLocked);
        }
        let pending = self.pending.clone().ok_or(SessionError::NoPendingPatient)?;
        self.touch();

        let failures = self
            .dob_failures
            .get(&pending.patient_id)
            .copied()
            .unwrap_or(0);
        if failures >= MAX_DOB_ATTEMPTS {
            return Ok(self.exhaust(&pending));
        }

        if verify_dob(&pending, input) {
            self.dob_failures.remove(&pending.patient_id);
            self.locked = Some(pending.clone());
            self.pending = None;
            self.candidates.clear();
            self.messages.clear();
            self.status = None;
            tracing::info!(session = %self.id, patient = %pending.log_ref(), "Patient locked");
            return Ok(DobOutcome::Locked(pending));
        }

        let failures = failures + 1;
        self.dob_failures.insert(pending.patient_id.clone(), failures);
        tracing::warn!(
            session = %self.id,
            patient = %pending.log_ref(),
            attempts = failures,
            "DOB confirmation failed"
        );

        if failures >= MAX_DOB_ATTEMPTS {
            return Ok(self.exhaust(&pending));
        }

        let attempts_left = MAX_DOB_ATTEMPTS - failures;
        self.status = Some(ResolveStatus::new(
            StatusLevel::Error,
            format!("DOB does not match. {attempts_left} attempt(s) left."),
        ));
        Ok(DobOutcome::Mismatch { attempts_left })
    }

    fn exhaust(&mut self, pending: &PatientRecord) -> DobOutcome {
        tracing::warn!(session = %self.id, patient = %pending.log_ref(), "DOB attempts exhausted");
        self.pending = None;
        self.status = Some(ResolveStatus::new(
            StatusLevel::Error,
            "DOB does not match. Too many attempts for this patient in this session.",
        ));
        DobOutcome::AttemptsExhausted
    }

    /// Unlock and forget everything patient-related, including history.
    pub fn change_patient(&mut self) {
        if let Some(p) = &self.locked {
            tracing::info!(session = %self.id, patient = %p.log_ref(), "Patient unlocked");
        }
        self.locked = None;
        self.pending = None;
        self.candidates.clear();
        self.messages.clear();
        self.status = None;
        self.touch();
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.touch();
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// SessionStore
// ═══════════════════════════════════════════════════════════

/// All live chat sessions, keyed by id.
pub struct SessionStore {
    sessions: HashMap<Uuid, ChatSession>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            idle_timeout,
        }
    }

    /// Create a session and return its id.
    pub fn create(&mut self) -> Uuid {
        let session = ChatSession::new();
        let id = session.id();
        self.sessions.insert(id, session);
        tracing::debug!(session = %id, total = self.sessions.len(), "Session created");
        id
    }

    pub fn get(&self, id: &Uuid) -> Result<&ChatSession, SessionError> {
        self.sessions.get(id).ok_or(SessionError::NotFound(*id))
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Result<&mut ChatSession, SessionError> {
        self.sessions.get_mut(id).ok_or(SessionError::NotFound(*id))
    }

    pub fn remove(&mut self, id: &Uuid) -> Result<(), SessionError> {
        self.sessions
            .remove(id)
            .map(|_| ())
            .ok_or(SessionError::NotFound(*id))
    }

    /// Drop sessions idle longer than the timeout. Returns how many went.
    pub fn evict_idle(&mut self) -> usize {
        let timeout = self.idle_timeout;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.idle_for() < timeout);
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = self.sessions.len(), "Idle sessions evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
