//! Error types for the workflow engine

use thiserror::Error;

/// Workflow error taxonomy.
///
/// Fatal kinds abort the workflow and surface a `failed` result at the batch
/// boundary. Non-fatal kinds accumulate in `state.errors` and the workflow
/// continues.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Classifier LLM unavailable, tool call rejected, or required variables
    /// missing. Fatal, never retried and never falls back to a heuristic.
    #[error("scope classification failed: {0}")]
    ScopeFailed(String),

    /// Plan materialization failed or the fill LLM returned invalid keys.
    #[error("plan fill failed: {0}")]
    FillFailed(String),

    /// A provider reported credit exhaustion (HTTP 402 equivalent).
    #[error("provider exhausted: {0}")]
    ProviderExhausted(String),

    /// A single adapter failed non-retryably, or retries were exhausted.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Research ended with zero evidence.
    #[error("no evidence collected: {0}")]
    NoEvidence(String),

    /// All webhook delivery attempts failed.
    #[error("webhook delivery failed: {0}")]
    WebhookDeliveryFailed(String),

    /// Malformed strategy encountered at runtime (unknown adapter method,
    /// unknown fan-out mode, bad step shape).
    #[error("strategy error: {0}")]
    StrategyError(String),

    /// Missing credentials for a required provider at call time.
    #[error("config error: {0}")]
    ConfigError(String),

    /// The workflow deadline expired or the run was cancelled.
    #[error("workflow cancelled: {0}")]
    Cancelled(String),

    #[error("LLM error: {0}")]
    Llm(String),

    /// LLM provider returned an HTTP error status.
    #[error("LLM HTTP error from {provider} ({status}): {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl WorkflowError {
    /// Whether this error aborts the whole workflow.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ScopeFailed(_)
            | Self::FillFailed(_)
            | Self::NoEvidence(_)
            | Self::StrategyError(_)
            | Self::ConfigError(_)
            | Self::Cancelled(_) => true,
            Self::ProviderExhausted(_)
            | Self::ProviderUnavailable(_)
            | Self::WebhookDeliveryFailed(_) => false,
            Self::Llm(_) | Self::LlmHttp { .. } => false,
            Self::Storage(_) | Self::Http(_) | Self::Json(_) | Self::Yaml(_) => false,
        }
    }

    /// Short machine-readable kind, used in result payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScopeFailed(_) => "SCOPE_FAILED",
            Self::FillFailed(_) => "FILL_FAILED",
            Self::ProviderExhausted(_) => "PROVIDER_EXHAUSTED",
            Self::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            Self::NoEvidence(_) => "NO_EVIDENCE",
            Self::WebhookDeliveryFailed(_) => "WEBHOOK_DELIVERY_FAILED",
            Self::StrategyError(_) => "STRATEGY_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Cancelled(_) => "CANCELLED",
            Self::Llm(_) | Self::LlmHttp { .. } => "LLM_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Yaml(_) => "YAML_ERROR",
        }
    }
}

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;
