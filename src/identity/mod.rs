//! Patient identity: roster building, fuzzy resolution of free-text
//! patient references, and date-of-birth verification before a record
//! is unlocked.

pub mod resolve;
pub mod roster;
pub mod similarity;
pub mod verify;

use thiserror::Error;

pub use resolve::{fuzzy_resolve, Resolution};
pub use roster::{Roster, RosterSource};
pub use verify::{verify_dob, MAX_DOB_ATTEMPTS};

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Roster source failed: {0}")]
    RosterSource(String),

    #[error("No patients found in rag_chunks.metadata")]
    EmptyRoster,
}
