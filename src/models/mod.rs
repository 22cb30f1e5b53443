pub mod conversation;
pub mod enums;
pub mod patient;

pub use conversation::{ChatMessage, Source};
pub use enums::*;
pub use patient::{patient_log_ref, PatientRecord, PatientSummary};
