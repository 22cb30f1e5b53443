use serde_json::Value;

use super::prompt::ROUTING_SYSTEM_PROMPT;
use super::types::{RouteAnalysis, RouterModel};
use crate::identity::{fuzzy_resolve, Roster};
use crate::models::{PatientRecord, ResolveReason, RouteIntent};

/// Confidence reported when the router gives none or fails.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Classification as returned by the router model, before roster lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterVerdict {
    pub patient_specific: bool,
    pub patient_reference: Option<String>,
    pub confidence: f32,
}

impl RouterVerdict {
    fn fallback() -> Self {
        Self {
            patient_specific: false,
            patient_reference: None,
            confidence: FALLBACK_CONFIDENCE,
        }
    }
}

/// Route a question: ask the router model, then resolve any patient
/// reference against the roster.
///
/// Router failures degrade to a general question; they never fail the request.
pub fn analyze_query(
    router: &dyn RouterModel,
    roster: &Roster,
    query: &str,
    locked: Option<&PatientRecord>,
) -> RouteAnalysis {
    let verdict = match router.classify(ROUTING_SYSTEM_PROMPT, query) {
        Ok(raw) => parse_router_output(&raw),
        Err(e) => {
            tracing::warn!(error = %e, "Query router failed, treating as general");
            RouterVerdict::fallback()
        }
    };
    let analysis = resolve_verdict(verdict, roster, locked);
    tracing::debug!(
        intent = analysis.intent.as_str(),
        confidence = analysis.confidence,
        candidates = analysis.candidates.len(),
        "Query routed"
    );
    analysis
}

/// Combine a router verdict with the roster and the locked patient.
pub fn resolve_verdict(
    verdict: RouterVerdict,
    roster: &Roster,
    locked: Option<&PatientRecord>,
) -> RouteAnalysis {
    let mut analysis = RouteAnalysis {
        intent: RouteIntent::General,
        patient_reference: verdict.patient_reference.clone(),
        confidence: verdict.confidence,
        resolved_patient: None,
        candidates: Vec::new(),
    };

    if !verdict.patient_specific {
        return analysis;
    }

    match verdict.patient_reference.as_deref() {
        Some(reference) => {
            let resolution = fuzzy_resolve(roster, reference);
            match resolution.reason {
                ResolveReason::ById | ResolveReason::ByName => {
                    analysis.intent = RouteIntent::PatientSpecific;
                    analysis.resolved_patient = resolution.patient;
                }
                ResolveReason::Ambiguous => {
                    analysis.intent = RouteIntent::PatientSpecific;
                    analysis.candidates = resolution.candidates;
                }
                ResolveReason::None => {
                    analysis.intent = RouteIntent::PatientSpecificNotFound;
                }
            }
        }
        None => match locked {
            Some(patient) => {
                analysis.intent = RouteIntent::PatientSpecificUseLocked;
                analysis.resolved_patient = Some(patient.clone());
            }
            None => analysis.intent = RouteIntent::PatientSpecificNoContext,
        },
    }
    analysis
}

/// Parse the router's JSON reply. Anything unreadable becomes the fallback.
pub fn parse_router_output(raw: &str) -> RouterVerdict {
    let Some(value) = extract_json_object(raw) else {
        tracing::warn!("Router reply was not JSON, treating as general");
        return RouterVerdict::fallback();
    };

    let patient_specific = value
        .get("intent")
        .and_then(Value::as_str)
        .map(|s| s.trim().eq_ignore_ascii_case("patient_specific"))
        .unwrap_or(false);

    let patient_reference = value
        .get("patient_reference")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string);

    let confidence = value
        .get("confidence")
        .and_then(|c| match c {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0) as f32)
        .unwrap_or(FALLBACK_CONFIDENCE);

    RouterVerdict {
        patient_specific,
        patient_reference,
        confidence,
    }
}

/// Find a JSON object in model output, tolerating ```json fences and
/// surrounding prose.
fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rag::RagError;

    struct FixedRouter(&'static str);

    impl RouterModel for FixedRouter {
        fn classify(&self, system: &str, _query: &str) -> Result<String, RagError> {
            assert!(system.contains("patient_reference"));
            Ok(self.0.to_string())
        }
    }

    struct BrokenRouter;

    impl RouterModel for BrokenRouter {
        fn classify(&self, _system: &str, _query: &str) -> Result<String, RagError> {
            Err(RagError::RateLimited { service: "openai" })
        }
    }

    fn patient(id: &str, first: &str, last: &str) -> PatientRecord {
        PatientRecord {
            patient_id: id.into(),
            first_name: first.into(),
            last_name: last.into(),
            dob: "1980-01-01".into(),
        }
    }

    fn roster() -> Roster {
        Roster::from_records(vec![
            patient("IVF001", "Priya", "Sharma"),
            patient("IVF002", "Alex", "Morgan"),
            patient("IVF003", "Sarah", "Johnson"),
            patient("CARD100", "Ravi", "Sharma"),
        ])
    }

    #[test]
    fn general_question_stays_general() {
        let router = FixedRouter(
            r#"{"intent":"general","patient_reference":null,"confidence":0.92}"#,
        );
        let a = analyze_query(&router, &roster(), "Explain hypertension", None);
        assert_eq!(a.intent, RouteIntent::General);
        assert!(a.resolved_patient.is_none());
        assert!((a.confidence - 0.92).abs() < 1e-6);
    }

    #[test]
    fn named_patient_is_resolved() {
        let router = FixedRouter(
            r#"{"intent":"patient_specific","patient_reference":"Sarah Johnson","confidence":0.95}"#,
        );
        let a = analyze_query(&router, &roster(), "What meds is Sarah Johnson on?", None);
        assert_eq!(a.intent, RouteIntent::PatientSpecific);
        assert_eq!(a.resolved_patient.unwrap().patient_id, "IVF003");
    }

    #[test]
    fn shared_surname_yields_candidates() {
        let router = FixedRouter(
            r#"{"intent":"patient_specific","patient_reference":"Sharma","confidence":0.8}"#,
        );
        let a = analyze_query(&router, &roster(), "Sharma's labs", None);
        assert_eq!(a.intent, RouteIntent::PatientSpecific);
        assert!(a.resolved_patient.is_none());
        assert!(a.candidates.len() >= 2);
    }

    #[test]
    fn unknown_reference_is_not_found() {
        let router = FixedRouter(
            r#"{"intent":"patient_specific","patient_reference":"Zebulon Quartermaine","confidence":0.9}"#,
        );
        let a = analyze_query(&router, &roster(), "Zebulon's MRI", None);
        assert_eq!(a.intent, RouteIntent::PatientSpecificNotFound);
        assert_eq!(a.patient_reference.as_deref(), Some("Zebulon Quartermaine"));
    }

    #[test]
    fn pronoun_question_uses_locked_patient() {
        let router = FixedRouter(
            r#"{"intent":"patient_specific","patient_reference":null,"confidence":0.7}"#,
        );
        let locked = patient("IVF002", "Alex", "Morgan");
        let a = analyze_query(&router, &roster(), "What are his vitals?", Some(&locked));
        assert_eq!(a.intent, RouteIntent::PatientSpecificUseLocked);
        assert_eq!(a.resolved_patient.unwrap().patient_id, "IVF002");
    }

    #[test]
    fn pronoun_question_without_lock_has_no_context() {
        let router = FixedRouter(r#"{"intent":"patient_specific","confidence":0.7}"#);
        let a = analyze_query(&router, &roster(), "What are his vitals?", None);
        assert_eq!(a.intent, RouteIntent::PatientSpecificNoContext);
    }

    #[test]
    fn router_failure_falls_back_to_general() {
        let a = analyze_query(&BrokenRouter, &roster(), "anything", None);
        assert_eq!(a.intent, RouteIntent::General);
        assert_eq!(a.confidence, FALLBACK_CONFIDENCE);
    }

    #[test]
    fn fenced_json_is_accepted() {
        let v = parse_router_output(
            "```json\n{\"intent\": \"patient_specific\", \"patient_reference\": \"IVF001\", \"confidence\": 0.9}\n```",
        );
        assert!(v.patient_specific);
        assert_eq!(v.patient_reference.as_deref(), Some("IVF001"));
    }

    #[test]
    fn garbage_falls_back() {
        assert_eq!(parse_router_output("I think it's general"), RouterVerdict::fallback());
        assert_eq!(parse_router_output("[1, 2]"), RouterVerdict::fallback());
    }

    #[test]
    fn missing_fields_use_defaults() {
        let v = parse_router_output("{}");
        assert!(!v.patient_specific);
        assert!(v.patient_reference.is_none());
        assert_eq!(v.confidence, FALLBACK_CONFIDENCE);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(parse_router_output(r#"{"confidence": 3.5}"#).confidence, 1.0);
        assert_eq!(parse_router_output(r#"{"confidence": -1}"#).confidence, 0.0);
        assert_eq!(parse_router_output(r#"{"confidence": "0.25"}"#).confidence, 0.25);
    }

    #[test]
    fn literal_null_string_reference_is_dropped() {
        let v = parse_router_output(r#"{"intent":"patient_specific","patient_reference":"null"}"#);
        assert!(v.patient_reference.is_none());
    }
}
