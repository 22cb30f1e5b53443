pub mod sanitize;
pub mod types;

pub use sanitize::{sanitize_query, sanitize_question};
pub use types::{InputModification, InputModificationKind, SafetyError, SanitizedInput};
