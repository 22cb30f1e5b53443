use thiserror::Error;

/// Result of question sanitization (pre-LLM).
#[derive(Debug, Clone)]
pub struct SanitizedInput {
    /// The cleaned question text.
    pub text: String,
    pub was_modified: bool,
    /// What was stripped (for audit, never the question itself).
    pub modifications: Vec<InputModification>,
}

/// A modification made during sanitization.
#[derive(Debug, Clone)]
pub struct InputModification {
    pub kind: InputModificationKind,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputModificationKind {
    InvisibleUnicodeRemoved,
    ControlCharacterRemoved,
    InjectionPatternRemoved,
    ExcessiveLengthTruncated,
}

impl InputModificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvisibleUnicodeRemoved => "invisible_unicode_removed",
            Self::ControlCharacterRemoved => "control_character_removed",
            Self::InjectionPatternRemoved => "injection_pattern_removed",
            Self::ExcessiveLengthTruncated => "excessive_length_truncated",
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SafetyError {
    #[error("Question is empty")]
    EmptyQuery,
}
