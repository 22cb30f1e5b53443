pub mod types;
pub mod classify;
pub mod retrieval;
pub mod prompt;
pub mod citation;
pub mod orchestrator;
pub mod openai;
pub mod supabase;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("{service} is unreachable: {detail}")]
    Connection { service: &'static str, detail: String },

    #[error("{service} request timed out after {secs}s")]
    Timeout { service: &'static str, secs: u64 },

    #[error("{service} rejected credentials (status {status})")]
    Authentication { service: &'static str, status: u16 },

    #[error("{service} rate limit reached")]
    RateLimited { service: &'static str },

    #[error("{service} returned error (status {status}): {body}")]
    Upstream {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Streaming error: {0}")]
    StreamingError(String),
}

impl RagError {
    /// Map a failed `send()` to a connection, timeout, or generic client error.
    pub(crate) fn from_send(service: &'static str, timeout_secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RagError::Timeout {
                service,
                secs: timeout_secs,
            }
        } else if err.is_connect() {
            RagError::Connection {
                service,
                detail: err.to_string(),
            }
        } else {
            RagError::HttpClient(err.to_string())
        }
    }

    /// Map a non-success HTTP status to an error.
    pub(crate) fn from_status(service: &'static str, status: u16, body: String) -> Self {
        match status {
            401 | 403 => RagError::Authentication { service, status },
            429 => RagError::RateLimited { service },
            _ => RagError::Upstream {
                service,
                status,
                body: body.chars().take(500).collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_authentication() {
        assert!(matches!(
            RagError::from_status("openai", 401, String::new()),
            RagError::Authentication { status: 401, .. }
        ));
        assert!(matches!(
            RagError::from_status("supabase", 403, String::new()),
            RagError::Authentication { status: 403, .. }
        ));
    }

    #[test]
    fn too_many_requests_maps_to_rate_limited() {
        assert!(matches!(
            RagError::from_status("openai", 429, "slow down".into()),
            RagError::RateLimited { service: "openai" }
        ));
    }

    #[test]
    fn upstream_body_is_truncated() {
        let err = RagError::from_status("supabase", 500, "x".repeat(2000));
        match err {
            RagError::Upstream { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), 500);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
