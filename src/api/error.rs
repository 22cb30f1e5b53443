//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core_state::CoreError;
use crate::identity::IdentityError;
use crate::pipeline::rag::RagError;
use crate::pipeline::safety::SafetyError;
use crate::session_cache::SessionError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("Upstream rejected credentials: {0}")]
    UpstreamAuth(String),
    #[error("Upstream rate limited: {0}")]
    UpstreamRateLimited(String),
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable code, also used on the WebSocket.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::UpstreamAuth(_) => "UPSTREAM_AUTH",
            ApiError::UpstreamRateLimited(_) => "UPSTREAM_RATE_LIMITED",
            ApiError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamAuth(_) | ApiError::UpstreamUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::UpstreamRateLimited(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client. Upstream and internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::BadRequest(detail)
            | ApiError::NotFound(detail)
            | ApiError::Conflict(detail) => detail.clone(),
            ApiError::RateLimited { retry_after } => {
                format!("Rate limit exceeded. Retry after {retry_after}s")
            }
            ApiError::UpstreamAuth(detail) => {
                tracing::error!(detail, "Upstream authentication failed");
                "An upstream service rejected our credentials".to_string()
            }
            ApiError::UpstreamRateLimited(detail) => {
                tracing::warn!(detail, "Upstream rate limited");
                "An upstream service is rate limiting requests. Try again shortly".to_string()
            }
            ApiError::UpstreamUnavailable(detail) => {
                tracing::warn!(detail, "Upstream unavailable");
                "An upstream service is unavailable".to_string()
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                "An internal error occurred".to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.public_message(),
            },
        };

        let mut response = (self.status(), Json(body)).into_response();
        if let ApiError::RateLimited { retry_after } = &self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::LockPoisoned => ApiError::Internal("lock poisoned".into()),
            CoreError::Identity(e) => e.into(),
            CoreError::Session(e) => e.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            SessionError::PatientLocked | SessionError::NoPendingPatient => {
                ApiError::Conflict(err.to_string())
            }
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        ApiError::UpstreamUnavailable(err.to_string())
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Authentication { .. } => ApiError::UpstreamAuth(err.to_string()),
            RagError::RateLimited { .. } => ApiError::UpstreamRateLimited(err.to_string()),
            _ => ApiError::UpstreamUnavailable(err.to_string()),
        }
    }
}

impl From<SafetyError> for ApiError {
    fn from(err: SafetyError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use uuid::Uuid;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn rate_limited_returns_429_with_retry_after() {
        let response = ApiError::RateLimited { retry_after: 60 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "60");
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn not_found_returns_404() {
        let response = ApiError::NotFound("Session not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_request_returns_400() {
        let response = ApiError::BadRequest("Invalid session id".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "Invalid session id");
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = ApiError::Internal("something broke".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn upstream_auth_maps_to_502() {
        let err: ApiError = RagError::Authentication {
            service: "OpenAI",
            status: 401,
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "UPSTREAM_AUTH");
        assert!(!json["error"]["message"].as_str().unwrap().contains("401"));
    }

    #[tokio::test]
    async fn upstream_rate_limit_maps_to_503() {
        let err: ApiError = RagError::RateLimited { service: "OpenAI" }.into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "UPSTREAM_RATE_LIMITED");
    }

    #[tokio::test]
    async fn upstream_timeout_maps_to_unavailable() {
        let err: ApiError = RagError::Timeout {
            service: "Supabase",
            secs: 120,
        }
        .into();
        assert_eq!(err.code(), "UPSTREAM_UNAVAILABLE");
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn session_errors_map_to_404_and_409() {
        let missing: ApiError = SessionError::NotFound(Uuid::nil()).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let locked: ApiError = SessionError::PatientLocked.into();
        assert_eq!(locked.status(), StatusCode::CONFLICT);
        let pending: ApiError = SessionError::NoPendingPatient.into();
        assert_eq!(pending.code(), "CONFLICT");
    }

    #[test]
    fn core_error_unwraps_nested_errors() {
        let err: ApiError = CoreError::Session(SessionError::PatientLocked).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let err: ApiError = CoreError::Identity(IdentityError::EmptyRoster).into();
        assert_eq!(err.code(), "UPSTREAM_UNAVAILABLE");
        let err: ApiError = CoreError::LockPoisoned.into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn empty_question_is_bad_request() {
        let err: ApiError = SafetyError::EmptyQuery.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
