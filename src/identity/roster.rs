use std::collections::HashSet;

use serde_json::Value;

use super::IdentityError;
use crate::models::PatientRecord;

/// Metadata keys accepted for each roster field, in lookup order.
const PATIENT_ID_KEYS: &[&str] = &["patient_id", "Patient_Id", "PatientID"];
const FIRST_NAME_KEYS: &[&str] = &["first_name", "First_Name"];
const LAST_NAME_KEYS: &[&str] = &["last_name", "Last_Name"];
const DOB_KEYS: &[&str] = &["dob", "Date_of_birth", "DOB"];

/// Anything that can list chunk metadata rows for roster building.
pub trait RosterSource: Send + Sync {
    fn fetch_metadata(&self, limit: usize) -> Result<Vec<Value>, IdentityError>;
}

/// In-memory patient roster, one entry per patient ID.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    patients: Vec<PatientRecord>,
}

impl Roster {
    /// Build from records, keeping the first occurrence of each ID.
    pub fn from_records(records: Vec<PatientRecord>) -> Self {
        let mut seen = HashSet::new();
        let patients = records
            .into_iter()
            .filter(|p| seen.insert(p.patient_id.clone()))
            .collect();
        Self { patients }
    }

    /// Build from raw chunk metadata objects. Rows without a patient ID
    /// are skipped.
    pub fn from_metadata<'a>(rows: impl IntoIterator<Item = &'a Value>) -> Self {
        let records = rows.into_iter().filter_map(record_from_metadata).collect();
        Self::from_records(records)
    }

    /// Fetch metadata from a source and build the roster.
    ///
    /// An empty roster is an error: nothing could ever be resolved.
    pub fn load(source: &dyn RosterSource, limit: usize) -> Result<Self, IdentityError> {
        let rows = source.fetch_metadata(limit)?;
        let roster = Self::from_metadata(rows.iter());
        if roster.is_empty() {
            tracing::error!(rows = rows.len(), "No patients found in chunk metadata");
            return Err(IdentityError::EmptyRoster);
        }
        tracing::info!(
            rows = rows.len(),
            patients = roster.len(),
            "Patient roster built from chunk metadata"
        );
        Ok(roster)
    }

    pub fn find(&self, patient_id: &str) -> Option<&PatientRecord> {
        self.patients.iter().find(|p| p.patient_id == patient_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatientRecord> {
        self.patients.iter()
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}

/// Read the first present alias of a field, stringifying non-string values.
fn lookup(metadata: &Value, keys: &[&str]) -> String {
    for key in keys {
        match metadata.get(*key) {
            Some(Value::String(s)) => return s.clone(),
            Some(Value::Null) | None => continue,
            Some(other) => return other.to_string(),
        }
    }
    String::new()
}

fn record_from_metadata(metadata: &Value) -> Option<PatientRecord> {
    if !metadata.is_object() {
        return None;
    }
    let patient_id = lookup(metadata, PATIENT_ID_KEYS);
    if patient_id.is_empty() {
        return None;
    }
    Some(PatientRecord {
        patient_id,
        first_name: lookup(metadata, FIRST_NAME_KEYS),
        last_name: lookup(metadata, LAST_NAME_KEYS),
        dob: lookup(metadata, DOB_KEYS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticSource(Vec<Value>);

    impl RosterSource for StaticSource {
        fn fetch_metadata(&self, limit: usize) -> Result<Vec<Value>, IdentityError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct FailingSource;

    impl RosterSource for FailingSource {
        fn fetch_metadata(&self, _limit: usize) -> Result<Vec<Value>, IdentityError> {
            Err(IdentityError::RosterSource("connection refused".into()))
        }
    }

    #[test]
    fn reads_capitalized_aliases() {
        let rows = [json!({
            "patient_id": "IVF001",
            "First_Name": "Priya",
            "Last_Name": "Sharma",
            "Date_of_birth": "1988-03-15",
            "doc_id": "meds_2025.txt"
        })];
        let roster = Roster::from_metadata(rows.iter());
        let p = roster.find("IVF001").unwrap();
        assert_eq!(p.first_name, "Priya");
        assert_eq!(p.last_name, "Sharma");
        assert_eq!(p.dob, "1988-03-15");
    }

    #[test]
    fn first_occurrence_wins() {
        let rows = [
            json!({"PatientID": "P1", "first_name": "Ann", "dob": "2000-01-01"}),
            json!({"PatientID": "P1", "first_name": "Anne", "dob": "1999-01-01"}),
        ];
        let roster = Roster::from_metadata(rows.iter());
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.find("P1").unwrap().first_name, "Ann");
    }

    #[test]
    fn rows_without_patient_id_are_skipped() {
        let rows = [
            json!({"first_name": "Ghost"}),
            json!(null),
            json!({"patient_id": "", "first_name": "Blank"}),
            json!({"Patient_Id": "P2", "first_name": "Bo"}),
        ];
        let roster = Roster::from_metadata(rows.iter());
        assert_eq!(roster.len(), 1);
        assert!(roster.find("P2").is_some());
    }

    #[test]
    fn numeric_ids_are_stringified() {
        let rows = [json!({"patient_id": 42, "DOB": "1970-01-01"})];
        let roster = Roster::from_metadata(rows.iter());
        let p = roster.find("42").unwrap();
        assert_eq!(p.dob, "1970-01-01");
        assert_eq!(p.first_name, "");
    }

    #[test]
    fn load_respects_limit() {
        let source = StaticSource(vec![
            json!({"patient_id": "A"}),
            json!({"patient_id": "B"}),
            json!({"patient_id": "C"}),
        ]);
        let roster = Roster::load(&source, 2).unwrap();
        assert_eq!(roster.len(), 2);
        assert!(roster.find("C").is_none());
    }

    #[test]
    fn load_rejects_empty_roster() {
        let source = StaticSource(vec![json!({"doc_id": "guideline.pdf"})]);
        assert!(matches!(
            Roster::load(&source, 10).unwrap_err(),
            IdentityError::EmptyRoster
        ));
    }

    #[test]
    fn load_propagates_source_errors() {
        let err = Roster::load(&FailingSource, 10).unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
