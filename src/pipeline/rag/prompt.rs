use super::types::{LlmMessage, RetrievalTarget, RetrievedChunk};
use crate::models::PatientRecord;

pub const PATIENT_SYSTEM_PROMPT: &str =
    "You are a clinical assistant. Use ONLY the retrieved patient context.";

pub const GENERAL_SYSTEM_PROMPT: &str =
    "You are a medical knowledge assistant. Use ONLY the retrieved document context.";

/// At most this many chunks go into the CONTEXT block.
pub const MAX_CONTEXT_CHUNKS: usize = 8;

const CHUNK_SEPARATOR: &str = "\n---\n";
const NO_CONTEXT: &str = "(no context)";

pub const ROUTING_SYSTEM_PROMPT: &str = r#"You are a query routing assistant for a medical EHR system. Analyze the user's query and determine:

1. **intent**: Is this a "patient_specific" query (asking about a specific patient's records) or a "general" query (asking about general medical knowledge)?

2. **patient_reference**: If patient-specific, extract any patient name or ID mentioned. Return null if none found.

3. **confidence**: Your confidence level (0.0 to 1.0) in the intent classification.

Examples:
- "What's the protocol for postoperative fever?" → intent: "general", patient_reference: null
- "Show me Alex's latest MRI results" → intent: "patient_specific", patient_reference: "Alex"
- "What medications is Sarah Johnson on?" → intent: "patient_specific", patient_reference: "Sarah Johnson"
- "Patient IVF001's lab results" → intent: "patient_specific", patient_reference: "IVF001"
- "What are his current vitals?" → intent: "patient_specific", patient_reference: null (context needed)
- "Explain hypertension treatment guidelines" → intent: "general", patient_reference: null

Return a JSON object with these fields: intent, patient_reference, confidence"#;

// ═══════════════════════════════════════════
// Canned replies (no retrieval)
// ═══════════════════════════════════════════

pub const LOCK_REQUIRED_REPLY: &str = "Please lock a patient first or switch to General mode.";

pub const NO_PATIENT_CONTEXT_REPLY: &str = "This question seems to be about a specific patient, \
but no patient is locked. Select a patient and confirm their date of birth, or switch to General mode.";

pub fn patient_not_found_reply(reference: Option<&str>) -> String {
    match reference {
        Some(r) => format!("No patient matching \"{r}\" was found in the roster."),
        None => "No matching patient was found in the roster.".to_string(),
    }
}

/// The question names a patient other than the verified one.
pub fn verify_patient_reply(patient: &PatientRecord) -> String {
    format!(
        "This question refers to {} (`{}`), who is not the locked patient. \
         Select this patient and confirm their date of birth before asking about their records.",
        patient.full_name(),
        patient.patient_id
    )
}

/// Several roster entries match the reference. DOBs are left out on purpose.
pub fn candidates_reply(candidates: &[PatientRecord]) -> String {
    let mut reply = String::from(
        "Several patients match that reference. Select one and confirm their date of birth:\n",
    );
    for c in candidates {
        reply.push_str(&format!("- `{}` — {}\n", c.patient_id, c.full_name()));
    }
    reply.trim_end().to_string()
}

// ═══════════════════════════════════════════
// Answer prompt
// ═══════════════════════════════════════════

/// Join chunk contents for the CONTEXT section.
pub fn build_context_block(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT.to_string();
    }
    chunks
        .iter()
        .take(MAX_CONTEXT_CHUNKS)
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

pub fn build_user_message(context_block: &str, question: &str) -> String {
    format!("CONTEXT:\n{context_block}\n\nQUESTION: {question}\nAnswer:")
}

pub fn system_prompt_for(target: &RetrievalTarget) -> &'static str {
    match target {
        RetrievalTarget::Patient(_) => PATIENT_SYSTEM_PROMPT,
        RetrievalTarget::General => GENERAL_SYSTEM_PROMPT,
    }
}

/// System + user messages for a retrieval-grounded answer.
pub fn build_messages(
    target: &RetrievalTarget,
    chunks: &[RetrievedChunk],
    question: &str,
) -> Vec<LlmMessage> {
    let context = build_context_block(chunks);
    vec![
        LlmMessage::system(system_prompt_for(target)),
        LlmMessage::user(&build_user_message(&context, question)),
    ]
}
