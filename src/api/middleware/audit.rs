//! Audit logging middleware.
//!
//! Records every API request with the client, method, path and
//! response status. Runs innermost, right around the handler.

use axum::extract::OriginalUri;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::middleware::rate::client_key;
use crate::api::types::ApiContext;
use crate::core_state::AccessSource;

/// Log API access for audit trail.
/// Accesses `ApiContext` from request extensions.
pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let Some(ctx) = req.extensions().get::<ApiContext>().cloned() else {
        return next.run(req).await;
    };

    let method = req.method().to_string();
    // Nested routers see the path with `/api` stripped
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let source = AccessSource::Http {
        client: client_key(&req, &ctx.trusted_proxies),
    };

    let response = next.run(req).await;

    let status = response.status().as_u16();
    ctx.core
        .log_access(source, &format!("{method} {path}"), &format!("status:{status}"));

    response
}
