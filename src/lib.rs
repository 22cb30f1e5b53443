pub mod api; // HTTP + WebSocket API
pub mod config;
pub mod core_state; // Shared state: roster, sessions, audit
pub mod identity; // Patient resolution + DOB verification
pub mod models;
pub mod pipeline; // Routing, retrieval, generation, sanitization
pub mod session_cache; // Per-session patient lock state

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, ConfigError};
use crate::core_state::{CoreState, Services};
use crate::identity::{IdentityError, Roster};
use crate::pipeline::rag::openai::OpenAiClient;
use crate::pipeline::rag::supabase::SupabaseClient;
use crate::pipeline::rag::RagError;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Client setup failed: {0}")]
    Client(#[from] RagError),
    #[error("Roster load failed: {0}")]
    Roster(#[from] IdentityError),
    #[error(transparent)]
    Server(#[from] api::ServerError),
    #[error("Startup task failed: {0}")]
    Task(String),
}

/// Install the global tracing subscriber (`RUST_LOG`, or the default filter).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}

/// Build the upstream clients and load the roster. Blocking.
pub fn bootstrap(config: &AppConfig) -> Result<CoreState, StartupError> {
    let openai = Arc::new(OpenAiClient::new(
        &config.openai_base_url,
        &config.openai_api_key,
        &config.llm_model,
        &config.router_model,
        &config.embedding_model,
        config.http_timeout_secs,
    )?);
    tracing::info!(model = openai.chat_model(), "LLM client ready");
    let supabase = Arc::new(SupabaseClient::new(
        &config.supabase_url,
        &config.supabase_key,
        config.http_timeout_secs,
    )?);

    let roster = Roster::load(supabase.as_ref(), config.roster_limit)?;
    tracing::info!(patients = roster.len(), "Roster loaded");

    let services = Services {
        generator: openai.clone(),
        embedder: openai.clone(),
        router: openai,
        store: supabase.clone(),
        roster_source: supabase,
    };
    Ok(CoreState::new(
        services,
        roster,
        config.top_k,
        config.roster_limit,
        config.session_idle,
    ))
}

/// Start the service and run until Ctrl-C.
pub async fn run(config: AppConfig) -> Result<(), StartupError> {
    tracing::info!(version = config::APP_VERSION, ?config, "{} starting", config::APP_NAME);

    let bind_addr = config.bind_addr;
    let trusted_proxies = config.trusted_proxies.clone();
    // Blocking HTTP clients must be built off the async runtime
    let core = tokio::task::spawn_blocking(move || bootstrap(&config))
        .await
        .map_err(|e| StartupError::Task(e.to_string()))??;

    let mut server = api::start_server(Arc::new(core), bind_addr, trusted_proxies).await?;
    tracing::info!(addr = %server.local_addr, "Ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
    server.shutdown();
    server.stopped().await?;
    Ok(())
}
