//! Shared application state.
//!
//! `CoreState` is wrapped in `Arc` at startup and handed to every axum
//! handler. `RwLock`s guard the roster and the session store; the
//! upstream clients are trait objects so tests can swap in mocks.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use uuid::Uuid;

use crate::identity::{IdentityError, Roster, RosterSource};
use crate::pipeline::rag::orchestrator::ChatPipeline;
use crate::pipeline::rag::types::{EmbeddingModel, LlmGenerate, RouterModel, VectorSearch};
use crate::session_cache::{SessionError, SessionStore};

/// Maximum audit entries kept in memory; oldest are dropped first.
const AUDIT_BUFFER_CAPACITY: usize = 1_000;

/// Upstream collaborators used to answer questions.
pub struct Services {
    pub generator: Arc<dyn LlmGenerate>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub store: Arc<dyn VectorSearch>,
    pub router: Arc<dyn RouterModel>,
    pub roster_source: Arc<dyn RosterSource>,
}

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    services: Services,
    /// Swapped wholesale on reload; readers keep their snapshot.
    roster: RwLock<Arc<Roster>>,
    sessions: RwLock<SessionStore>,
    audit: AuditLogger,
    pub top_k: usize,
    pub roster_limit: usize,
}

impl CoreState {
    pub fn new(
        services: Services,
        roster: Roster,
        top_k: usize,
        roster_limit: usize,
        session_idle: Duration,
    ) -> Self {
        Self {
            services,
            roster: RwLock::new(Arc::new(roster)),
            sessions: RwLock::new(SessionStore::new(session_idle)),
            audit: AuditLogger::new(),
            top_k,
            roster_limit,
        }
    }

    // ── Roster ──────────────────────────────────────────────

    /// Current roster snapshot.
    pub fn roster(&self) -> Result<Arc<Roster>, CoreError> {
        self.roster
            .read()
            .map(|r| Arc::clone(&r))
            .map_err(|_| CoreError::LockPoisoned)
    }

    /// Rebuild the roster from the source. Blocking; the old roster stays
    /// in place if the reload fails or comes back empty.
    pub fn reload_roster(&self) -> Result<usize, CoreError> {
        let fresh = Roster::load(self.services.roster_source.as_ref(), self.roster_limit)?;
        let count = fresh.len();
        let mut guard = self.roster.write().map_err(|_| CoreError::LockPoisoned)?;
        *guard = Arc::new(fresh);
        tracing::info!(patients = count, "Roster reloaded");
        Ok(count)
    }

    // ── Sessions ────────────────────────────────────────────

    pub fn read_sessions(&self) -> Result<RwLockReadGuard<'_, SessionStore>, CoreError> {
        self.sessions.read().map_err(|_| CoreError::LockPoisoned)
    }

    pub fn write_sessions(&self) -> Result<RwLockWriteGuard<'_, SessionStore>, CoreError> {
        self.sessions.write().map_err(|_| CoreError::LockPoisoned)
    }

    /// Drop idle sessions. Called periodically by the server.
    pub fn evict_idle_sessions(&self) -> Result<usize, CoreError> {
        Ok(self.write_sessions()?.evict_idle())
    }

    // ── Pipeline ────────────────────────────────────────────

    /// Question pipeline over the given roster snapshot.
    pub fn pipeline<'a>(&'a self, roster: &'a Roster) -> ChatPipeline<'a> {
        ChatPipeline::new(
            self.services.generator.as_ref(),
            self.services.embedder.as_ref(),
            self.services.store.as_ref(),
            self.services.router.as_ref(),
            roster,
            self.top_k,
        )
    }

    // ── Audit ───────────────────────────────────────────────

    pub fn log_access(&self, source: AccessSource, action: &str, entity: &str) {
        self.audit.log(source, action, entity);
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.entries()
    }
}

/// Errors from CoreState operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Internal lock error")]
    LockPoisoned,
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

// ═══════════════════════════════════════════════════════════
// Access source tracking
// ═══════════════════════════════════════════════════════════

/// Who touched the data, for the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessSource {
    /// A raw HTTP request, identified by client address.
    Http { client: String },
    /// An action taken inside a chat session.
    Session(Uuid),
}

impl std::fmt::Display for AccessSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http { client } => write!(f, "http:{client}"),
            Self::Session(id) => write!(f, "session:{id}"),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Audit logger
// ═══════════════════════════════════════════════════════════

/// Bounded in-memory audit log.
pub struct AuditLogger {
    buffer: Mutex<VecDeque<AuditEntry>>,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source: AccessSource,
    pub action: String,
    /// Route, or a hashed patient reference. Never a raw identifier.
    pub entity: String,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(AUDIT_BUFFER_CAPACITY)),
        }
    }

    pub fn log(&self, source: AccessSource, action: &str, entity: &str) {
        if let Ok(mut buf) = self.buffer.lock() {
            if buf.len() >= AUDIT_BUFFER_CAPACITY {
                buf.pop_front();
            }
            buf.push_back(AuditEntry {
                timestamp: chrono::Utc::now(),
                source,
                action: action.to_string(),
                entity: entity.to_string(),
            });
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.len()).unwrap_or(0)
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// Test support
// ═══════════════════════════════════════════════════════════
