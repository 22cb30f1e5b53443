//! HTTP API.
//!
//! Exposes sessions, patient selection and chat as JSON endpoints under
//! `/api/`, plus a WebSocket for streamed answers. Every route passes
//! through the middleware stack: Rate Limit → Audit → Handler.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;
pub mod websocket;

pub use router::{api_router, api_router_behind};
pub use server::{start_server, ApiServer, ServerError};
pub use types::ApiContext;
