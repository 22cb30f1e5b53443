//! API server lifecycle: binds the listener, serves `api_router_behind()`, and
//! runs the idle-session sweeper until shutdown.
//!
//! bind → spawn background task → return handle with shutdown channel.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::router::api_router_behind;
use crate::core_state::CoreState;

/// How often idle sessions are swept.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Server task failed: {0}")]
    Task(String),
}

/// Handle to a running API server.
pub struct ApiServer {
    pub local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ApiServer {
    /// Signal graceful shutdown. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
    }

    /// Wait for the server task to finish.
    pub async fn stopped(&mut self) -> Result<(), ServerError> {
        match self.task.take() {
            Some(task) => task.await.map_err(|e| ServerError::Task(e.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind `addr` and serve the API in a background task.
///
/// Port 0 picks an ephemeral port; the bound address is on the handle.
/// `X-Forwarded-For` is believed only from `trusted_proxies`.
pub async fn start_server(
    core: Arc<CoreState>,
    addr: SocketAddr,
    trusted_proxies: Vec<IpAddr>,
) -> Result<ApiServer, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::Bind { addr, source })?;

    let app = api_router_behind(core.clone(), trusted_proxies);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let sweeper = tokio::spawn(sweep_idle_sessions(core));

    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("API server received shutdown signal");
        };

        tracing::info!(addr = %local_addr, "API server started");

        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await
        {
            tracing::error!("API server error: {e}");
        }

        sweeper.abort();
        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn sweep_idle_sessions(core: Arc<CoreState>) {
    let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
    ticker.tick().await; // Consume initial immediate tick
    loop {
        ticker.tick().await;
        if let Err(e) = core.evict_idle_sessions() {
            tracing::error!(error = %e, "Idle session sweep failed");
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
