use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One patient in the roster, as recorded in chunk metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub dob: String,
}

impl PatientRecord {
    /// "First Last", trimmed. Either part may be empty.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Short stable hash of the patient id for log lines.
    /// Raw identifiers never go to tracing output.
    pub fn log_ref(&self) -> String {
        patient_log_ref(&self.patient_id)
    }
}

/// Hash an identifier to 12 hex chars for logging.
pub fn patient_log_ref(patient_id: &str) -> String {
    let digest = Sha256::digest(patient_id.as_bytes());
    digest
        .iter()
        .take(6)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Patient as shown to the client: never includes the DOB before verification.
#[derive(Debug, Clone, Serialize)]
pub struct PatientSummary {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<&PatientRecord> for PatientSummary {
    fn from(p: &PatientRecord) -> Self {
        Self {
            patient_id: p.patient_id.clone(),
            first_name: p.first_name.clone(),
            last_name: p.last_name.clone(),
        }
    }
}
