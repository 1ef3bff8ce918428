//! Per-phase LLM client resolution.
//!
//! Strategies can override model, temperature and max_tokens per phase via
//! their `llm` table; everything else falls back to the process defaults.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{Result, WorkflowError};
use crate::llm::client::{CompletionRequest, LlmClient};
use crate::llm::openai::OpenAiCompatClient;
use crate::models::Strategy;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// A resolved client plus the sampling parameters for one phase.
#[derive(Clone)]
pub struct PhaseLlm {
    pub client: Arc<dyn LlmClient>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl std::fmt::Debug for PhaseLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseLlm")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl PhaseLlm {
    /// Apply the phase's sampling parameters to a request, keeping values
    /// the caller set explicitly.
    pub fn apply(&self, mut request: CompletionRequest) -> CompletionRequest {
        if request.temperature.is_none() {
            request.temperature = self.temperature;
        }
        if request.max_tokens.is_none() {
            request.max_tokens = self.max_tokens;
        }
        request
    }
}

pub struct LlmFactory {
    api_key: Option<String>,
    base_url: Option<String>,
    default_model: String,
    timeout: Duration,
    /// Test seam: when set, every phase resolves to this client.
    fixed_client: Option<Arc<dyn LlmClient>>,
}

impl LlmFactory {
    pub fn from_config(config: &ProviderConfig, timeout: Duration) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            default_model: DEFAULT_MODEL.to_string(),
            timeout: config.timeout.unwrap_or(timeout),
            fixed_client: None,
        }
    }

    /// Build a factory that always returns the given client.
    pub fn fixed(client: Arc<dyn LlmClient>) -> Self {
        Self {
            api_key: None,
            base_url: None,
            default_model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(60),
            fixed_client: Some(client),
        }
    }

    /// Resolve the client and parameters for `phase`, honoring the
    /// strategy's `llm` overrides when present.
    pub fn for_phase(&self, strategy: Option<&Strategy>, phase: &str) -> Result<PhaseLlm> {
        let overrides = strategy.and_then(|s| s.llm.get(phase));

        if let Some(client) = &self.fixed_client {
            return Ok(PhaseLlm {
                client: client.clone(),
                temperature: overrides.and_then(|o| o.temperature),
                max_tokens: overrides.and_then(|o| o.max_tokens),
            });
        }

        let api_key = self.api_key.clone().ok_or_else(|| {
            WorkflowError::ConfigError("LLM provider credentials are not configured".into())
        })?;

        let model = overrides
            .map(|o| o.model.clone())
            .unwrap_or_else(|| self.default_model.clone());

        let mut client = OpenAiCompatClient::new("llm", api_key)
            .with_model(model)
            .with_timeout(self.timeout);
        if let Some(base_url) = &self.base_url {
            client = client.with_base_url(base_url.clone());
        }

        Ok(PhaseLlm {
            client: Arc::new(client),
            temperature: overrides.and_then(|o| o.temperature),
            max_tokens: overrides.and_then(|o| o.max_tokens),
        })
    }
}
