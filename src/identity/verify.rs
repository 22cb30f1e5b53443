use subtle::ConstantTimeEq;

use crate::models::PatientRecord;

/// Failed DOB attempts allowed before the pending patient is discarded.
pub const MAX_DOB_ATTEMPTS: u32 = 3;

/// Normalize a typed date of birth: trim, and accept `/` or `.` as
/// separators in `YYYY?MM?DD` form.
pub fn normalize_dob(input: &str) -> String {
    let trimmed = input.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() == 10
        && matches!(bytes[4], b'/' | b'.')
        && bytes[7] == bytes[4]
        && trimmed
            .chars()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
    {
        return format!("{}-{}-{}", &trimmed[..4], &trimmed[5..7], &trimmed[8..]);
    }
    trimmed.to_string()
}

/// Check a typed DOB against the patient's recorded DOB.
///
/// A patient with no recorded DOB can never be verified.
pub fn verify_dob(patient: &PatientRecord, input: &str) -> bool {
    let expected = patient.dob.trim();
    if expected.is_empty() {
        return false;
    }
    let given = normalize_dob(input);
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}
