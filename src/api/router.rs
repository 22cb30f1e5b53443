//! HTTP API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`.
//!
//! Middleware stack (outermost → innermost):
//! 1. Rate limiter → 2. Audit logger

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::header::CACHE_CONTROL;
use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::api::websocket;
use crate::core_state::CoreState;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>) -> Router {
    api_router_behind(core, Vec::new())
}

/// Build the API router for a deployment behind reverse proxies.
///
/// `X-Forwarded-For` is only honored on connections from `trusted_proxies`.
pub fn api_router_behind(core: Arc<CoreState>, trusted_proxies: Vec<IpAddr>) -> Router {
    build_router(ApiContext::new(core, trusted_proxies))
}

fn build_router(ctx: ApiContext) -> Router {
    // Layers are applied from bottom (innermost) to top (outermost):
    //   Extension → Rate limit → Audit → no-store header → Handler
    //
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/sessions", post(endpoints::sessions::create))
        .route(
            "/sessions/:id",
            get(endpoints::sessions::view).delete(endpoints::sessions::delete),
        )
        .route("/sessions/:id/mode", put(endpoints::sessions::set_mode))
        .route(
            "/sessions/:id/patient/resolve",
            post(endpoints::patients::resolve),
        )
        .route(
            "/sessions/:id/patient/confirm",
            post(endpoints::patients::confirm),
        )
        .route(
            "/sessions/:id/patient/change",
            post(endpoints::patients::change),
        )
        .route("/sessions/:id/route", post(endpoints::chat::route))
        .route("/sessions/:id/chat", post(endpoints::chat::ask))
        .route("/sessions/:id/messages", get(endpoints::sessions::messages))
        .route("/sessions/:id/chat/ws", get(websocket::ws_upgrade))
        .route("/roster/reload", post(endpoints::roster::reload))
        .with_state(ctx.clone())
        // Responses may carry patient data
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx));

    Router::new().nest("/api", api)
}
