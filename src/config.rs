use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "ehr-query-agent";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ROUTER_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_BIND: &str = "127.0.0.1:8501";
pub const DEFAULT_ROSTER_LIMIT: usize = 20_000;
pub const DEFAULT_TOP_K: usize = 6;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 1_800;

/// Tracing filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "ehr_query_agent=info,tower_http=warn"
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime configuration, read from the environment.
#[derive(Clone)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub llm_model: String,
    pub router_model: String,
    pub embedding_model: String,
    pub supabase_url: String,
    pub supabase_key: String,
    pub bind_addr: SocketAddr,
    pub roster_limit: usize,
    pub top_k: usize,
    pub http_timeout_secs: u64,
    pub session_idle: Duration,
    /// Reverse proxies whose `X-Forwarded-For` is believed. Empty by default.
    pub trusted_proxies: Vec<IpAddr>,
}

impl AppConfig {
    /// Read the process environment, falling back to a `.env` file in the
    /// working directory or a parent. Process variables win.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = dotenv_file_values();
        Self::from_lookup(env_over_file(|name| std::env::var(name).ok(), &file))
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));
        let or_default = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let bind_raw = or_default("EHR_AGENT_BIND", DEFAULT_BIND);
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "EHR_AGENT_BIND",
            value: bind_raw.clone(),
        })?;

        let top_k = parse_number(get("EHR_AGENT_TOP_K"), "EHR_AGENT_TOP_K", DEFAULT_TOP_K)?;
        if top_k == 0 {
            return Err(ConfigError::Invalid {
                name: "EHR_AGENT_TOP_K",
                value: "0".into(),
            });
        }

        let trusted_proxies = match get("EHR_AGENT_TRUSTED_PROXIES") {
            None => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| {
                    v.parse().map_err(|_| ConfigError::Invalid {
                        name: "EHR_AGENT_TRUSTED_PROXIES",
                        value: v.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?,
        };

        Ok(Self {
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_base_url: or_default("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
            llm_model: or_default("LLM_MODEL", DEFAULT_LLM_MODEL),
            router_model: or_default("ROUTER_MODEL", DEFAULT_ROUTER_MODEL),
            embedding_model: or_default("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            supabase_url: required("SUPABASE_URL")?,
            supabase_key: required("SERVICE_SUPABASEANON_KEY")?,
            bind_addr,
            roster_limit: parse_number(
                get("EHR_AGENT_ROSTER_LIMIT"),
                "EHR_AGENT_ROSTER_LIMIT",
                DEFAULT_ROSTER_LIMIT,
            )?,
            top_k,
            http_timeout_secs: parse_number(
                get("EHR_AGENT_HTTP_TIMEOUT_SECS"),
                "EHR_AGENT_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?,
            session_idle: Duration::from_secs(parse_number(
                get("EHR_AGENT_SESSION_IDLE_SECS"),
                "EHR_AGENT_SESSION_IDLE_SECS",
                DEFAULT_SESSION_IDLE_SECS,
            )?),
            trusted_proxies,
        })
    }
}

fn dotenv_file_values() -> HashMap<String, String> {
    match dotenvy::dotenv_iter() {
        Ok(iter) => parse_dotenv(iter),
        Err(e) if e.not_found() => HashMap::new(),
        Err(e) => {
            tracing::warn!(error = %e, "Could not read .env file");
            HashMap::new()
        }
    }
}

/// Collect `.env` entries, skipping malformed lines.
fn parse_dotenv<I>(iter: I) -> HashMap<String, String>
where
    I: Iterator<Item = dotenvy::Result<(String, String)>>,
{
    iter.filter_map(|entry| match entry {
        Ok(kv) => Some(kv),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed .env line");
            None
        }
    })
    .collect()
}

fn env_over_file<'a, F>(
    process: F,
    file: &'a HashMap<String, String>,
) -> impl Fn(&str) -> Option<String> + 'a
where
    F: Fn(&str) -> Option<String> + 'a,
{
    move |name| process(name).or_else(|| file.get(name).cloned())
}

fn parse_number<T: std::str::FromStr>(
    raw: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("openai_api_key", &"<redacted>")
            .field("openai_base_url", &self.openai_base_url)
            .field("llm_model", &self.llm_model)
            .field("router_model", &self.router_model)
            .field("embedding_model", &self.embedding_model)
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &"<redacted>")
            .field("bind_addr", &self.bind_addr)
            .field("roster_limit", &self.roster_limit)
            .field("top_k", &self.top_k)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("session_idle", &self.session_idle)
            .field("trusted_proxies", &self.trusted_proxies)
            .finish()
    }
}
