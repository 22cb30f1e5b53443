//! API endpoint handlers.
//!
//! Handlers take short session locks and push upstream work onto
//! `spawn_blocking`, since the provider clients are blocking.

pub mod chat;
pub mod health;
pub mod patients;
pub mod roster;
pub mod sessions;

use uuid::Uuid;

use crate::api::error::ApiError;

/// Parse a session id from the URL path.
pub(crate) fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid session id: {raw}")))
}
