use super::roster::Roster;
use super::similarity::weighted_ratio;
use crate::models::{PatientRecord, ResolveReason};

/// Score at or above which a single name match is accepted outright.
pub const ACCEPT_SCORE: f64 = 80.0;
/// Minimum score for a name to be offered as a candidate.
pub const CANDIDATE_SCORE: f64 = 60.0;
/// Maximum number of candidates returned for an ambiguous name.
pub const MAX_CANDIDATES: usize = 5;
/// Two top scores closer than this are treated as a tie.
const TIE_EPSILON: f64 = 0.5;

/// Outcome of matching free text against the roster.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub patient: Option<PatientRecord>,
    pub candidates: Vec<PatientRecord>,
    pub reason: ResolveReason,
}

impl Resolution {
    fn none() -> Self {
        Self {
            patient: None,
            candidates: Vec::new(),
            reason: ResolveReason::None,
        }
    }

    fn resolved(patient: &PatientRecord, reason: ResolveReason) -> Self {
        Self {
            patient: Some(patient.clone()),
            candidates: Vec::new(),
            reason,
        }
    }

    fn ambiguous(candidates: Vec<PatientRecord>) -> Self {
        Self {
            patient: None,
            candidates,
            reason: ResolveReason::Ambiguous,
        }
    }
}

/// Resolve a patient ID fragment or name against the roster.
///
/// An exact ID wins outright, then ID substrings, then names. A name is
/// accepted when exactly one
/// roster entry scores at least [`ACCEPT_SCORE`]; otherwise up to
/// [`MAX_CANDIDATES`] entries scoring at least [`CANDIDATE_SCORE`] are
/// returned as ambiguous.
pub fn fuzzy_resolve(roster: &Roster, query: &str) -> Resolution {
    let query = query.trim();
    if query.is_empty() {
        return Resolution::none();
    }

    // Pass 1: exact patient ID, so "P1" is not swallowed by "P10"
    if let Some(p) = roster
        .iter()
        .find(|p| p.patient_id.eq_ignore_ascii_case(query))
    {
        return Resolution::resolved(p, ResolveReason::ById);
    }

    // Pass 2: patient ID substring (case-insensitive)
    let needle = query.to_lowercase();
    let id_hits: Vec<&PatientRecord> = roster
        .iter()
        .filter(|p| p.patient_id.to_lowercase().contains(&needle))
        .collect();

    match id_hits.len() {
        1 => return Resolution::resolved(id_hits[0], ResolveReason::ById),
        n if n > 1 => {
            return Resolution::ambiguous(id_hits.into_iter().cloned().collect());
        }
        _ => {}
    }

    // Pass 3: fuzzy name match over "first last"
    let mut scored: Vec<(usize, f64)> = roster
        .iter()
        .enumerate()
        .map(|(idx, p)| (idx, weighted_ratio(query, &p.full_name())))
        .collect();

    if scored.is_empty() {
        return Resolution::none();
    }

    // Stable sort keeps roster order among equal scores
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let records: Vec<&PatientRecord> = roster.iter().collect();
    let (best_idx, best_score) = scored[0];

    if best_score >= ACCEPT_SCORE {
        let tied = scored
            .get(1)
            .map(|(_, s)| best_score - s < TIE_EPSILON)
            .unwrap_or(false);
        if !tied {
            return Resolution::resolved(records[best_idx], ResolveReason::ByName);
        }
        tracing::debug!(best_score, "Top name matches tied, returning candidates");
    }

    let candidates: Vec<PatientRecord> = scored
        .iter()
        .take(MAX_CANDIDATES)
        .filter(|(_, score)| *score >= CANDIDATE_SCORE)
        .map(|(idx, _)| records[*idx].clone())
        .collect();

    if candidates.is_empty() {
        Resolution::none()
    } else {
        Resolution::ambiguous(candidates)
    }
}
