//! Server and provider configuration, loaded from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Per-provider credential and endpoint configuration.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

impl ProviderConfig {
    fn from_env(prefix: &str) -> Self {
        Self {
            api_key: env::var(format!("{prefix}_API_KEY")).ok(),
            base_url: env::var(format!("{prefix}_BASE_URL")).ok(),
            timeout: env::var(format!("{prefix}_TIMEOUT_SECS"))
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Process-wide API key checked by the `X-API-Key` middleware. When unset
    /// the API is open (development mode).
    pub api_key: Option<String>,
    /// Path of the redb database file.
    pub db_path: PathBuf,
    /// Directory of bootstrap strategy YAML files.
    pub strategies_dir: PathBuf,
    /// Upper bound on concurrently executing batch tasks.
    pub max_concurrency: usize,
    /// Overall per-workflow deadline.
    pub workflow_deadline: Duration,
    /// Default per-adapter call timeout.
    pub adapter_timeout: Duration,
    /// Default per-LLM call timeout.
    pub llm_timeout: Duration,
    pub exa: ProviderConfig,
    pub sonar: ProviderConfig,
    pub llm: ProviderConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3720
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("briefcast")
        .join("briefcast.db")
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let host = env::var("BRIEFCAST_HOST").unwrap_or_else(|_| default_host());
        let port = env::var("BRIEFCAST_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or_else(default_port);
        let api_key = env::var("BRIEFCAST_API_KEY").ok().filter(|k| !k.is_empty());
        let db_path = env::var("BRIEFCAST_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_db_path());
        let strategies_dir = env::var("BRIEFCAST_STRATEGIES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("strategies"));
        let max_concurrency = env::var("BRIEFCAST_MAX_CONCURRENCY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let workflow_deadline = env::var("BRIEFCAST_WORKFLOW_DEADLINE_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(600));
        let adapter_timeout = env::var("BRIEFCAST_ADAPTER_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        let llm_timeout = env::var("BRIEFCAST_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        Ok(Self {
            host,
            port,
            api_key,
            db_path,
            strategies_dir,
            max_concurrency,
            workflow_deadline,
            adapter_timeout,
            llm_timeout,
            exa: ProviderConfig::from_env("EXA"),
            sonar: ProviderConfig::from_env("SONAR"),
            llm: ProviderConfig::from_env("BRIEFCAST_LLM"),
        })
    }
}
