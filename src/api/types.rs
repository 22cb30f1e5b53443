//! Shared types for the HTTP API layer.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core_state::CoreState;
use crate::models::{PatientSummary, QueryMode};
use crate::session_cache::{ChatSession, ResolveStatus};

/// Requests allowed per client per minute.
const REQUESTS_PER_MINUTE: u32 = 60;

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    /// Peers allowed to name the real client via `X-Forwarded-For`.
    pub trusted_proxies: Arc<Vec<IpAddr>>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>, trusted_proxies: Vec<IpAddr>) -> Self {
        Self {
            core,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new())),
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Rate limiter: per-client sliding window
// ═══════════════════════════════════════════════════════════

pub struct RateLimiter {
    windows: HashMap<String, Vec<Instant>>,
    per_minute: u32,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_limit(REQUESTS_PER_MINUTE)
    }

    pub fn with_limit(per_minute: u32) -> Self {
        Self {
            windows: HashMap::new(),
            per_minute,
        }
    }

    /// Check if a client is within the limit. Returns `Ok(())` or
    /// `Err(retry_after_secs)` if exceeded.
    pub fn check(&mut self, client: &str) -> Result<(), u64> {
        let now = Instant::now();
        let window = Duration::from_secs(60);

        // Forget clients that have gone quiet
        if self.windows.len() > 1_000 {
            self.windows
                .retain(|_, hits| hits.last().is_some_and(|t| now.duration_since(*t) < window));
        }

        let entries = self.windows.entry(client.to_string()).or_default();
        entries.retain(|ts| now.duration_since(*ts) < window);

        if entries.len() as u32 >= self.per_minute {
            let oldest = entries.first().copied().unwrap_or(now);
            let wait = window.saturating_sub(now.duration_since(oldest));
            return Err(wait.as_secs().max(1));
        }

        entries.push(now);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// Session view: what clients see of a ChatSession
// ═══════════════════════════════════════════════════════════

/// Client-facing snapshot of a session. Patients appear without DOB.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub mode: QueryMode,
    pub locked_patient: Option<PatientSummary>,
    pub pending_patient: Option<PatientSummary>,
    pub candidates: Vec<PatientSummary>,
    pub status: Option<ResolveStatus>,
    pub dob_attempts: u32,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&ChatSession> for SessionView {
    fn from(s: &ChatSession) -> Self {
        Self {
            session_id: s.id(),
            mode: s.mode(),
            locked_patient: s.locked().map(PatientSummary::from),
            pending_patient: s.pending().map(PatientSummary::from),
            candidates: s.candidates().iter().map(PatientSummary::from).collect(),
            status: s.status().cloned(),
            dob_attempts: s.dob_attempts(),
            message_count: s.messages().len(),
            created_at: s.created_at(),
        }
    }
}
