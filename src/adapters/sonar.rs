//! Perplexity Sonar adapter: search-grounded answers over the
//! chat-completions wire format, with citations lifted into evidence.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::{Duration, Instant};

use crate::adapters::{AdapterError, AdapterErrorKind, ToolAdapter, ToolResult, time_remaining};
use crate::config::ProviderConfig;
use crate::error::WorkflowError;
use crate::evidence::EvidenceStore;
use crate::llm::{CompletionRequest, LlmClient, Message, OpenAiCompatClient};

const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
const DEFAULT_MODEL: &str = "sonar";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SonarAdapter {
    client: Option<OpenAiCompatClient>,
    store: EvidenceStore,
}

impl SonarAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        let client = config.api_key.as_ref().map(|key| {
            OpenAiCompatClient::new("sonar", key.clone())
                .with_model(DEFAULT_MODEL)
                .with_base_url(
                    config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                )
                .with_timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
        });
        Self {
            client,
            store: EvidenceStore::default(),
        }
    }

    fn err(&self, method: &str, kind: AdapterErrorKind, message: impl Into<String>) -> AdapterError {
        AdapterError::new("sonar", method, kind, message)
    }

    fn citations_to_evidence(&self, citations: &[String]) -> Vec<crate::models::Evidence> {
        citations
            .iter()
            .filter_map(|url| {
                let raw = json!({"url": url});
                self.store.normalize(&raw, "sonar")
            })
            .collect()
    }
}

#[async_trait]
impl ToolAdapter for SonarAdapter {
    fn name(&self) -> &str {
        "sonar"
    }

    fn methods(&self) -> &[&'static str] {
        &["search", "overview"]
    }

    async fn invoke(
        &self,
        method: &str,
        inputs: &Value,
        deadline: Instant,
    ) -> Result<ToolResult, AdapterError> {
        let client = self.client.as_ref().ok_or_else(|| {
            self.err(method, AdapterErrorKind::Config, "SONAR_API_KEY is not configured")
        })?;

        if time_remaining(deadline).is_zero() {
            return Err(self.err(
                method,
                AdapterErrorKind::DeadlineExceeded,
                "workflow deadline expired",
            ));
        }

        let query = inputs["query"].as_str().filter(|q| !q.is_empty()).ok_or_else(|| {
            self.err(method, AdapterErrorKind::BadRequest, "missing input 'query'")
        })?;

        let system = match method {
            "overview" => {
                "You are a research assistant. Write a concise, source-grounded overview \
                 of the topic. Cite your sources."
            }
            "search" => {
                "You are a research assistant. Report the key facts on the topic as short \
                 bullet points. Cite your sources."
            }
            other => {
                return Err(self.err(
                    other,
                    AdapterErrorKind::BadRequest,
                    format!("unknown method '{other}'"),
                ));
            }
        };

        let mut user = query.to_string();
        if let Some(recency) = inputs["search_recency_filter"].as_str() {
            user = format!("{user}\n\nOnly consider sources from the past {recency}.");
        }

        let mut request =
            CompletionRequest::new(vec![Message::system(system), Message::user(user)]);
        if let Some(max_tokens) = inputs["max_tokens"].as_u64() {
            request = request.with_max_tokens(max_tokens as u32);
        }

        let response = client.complete(request).await.map_err(|e| match e {
            WorkflowError::LlmHttp { status, message, .. } => self.err(
                method,
                AdapterError::kind_for_status(status),
                format!("HTTP {status}: {message}"),
            ),
            other => self.err(method, AdapterErrorKind::Transient, other.to_string()),
        })?;

        let mut evidence = self.citations_to_evidence(&response.citations);

        // The overview text itself is sentinel evidence so the synthesizer
        // can cite it; plain search contributes only its sources.
        if method == "overview"
            && let Some(answer) = response.content.filter(|c| !c.is_empty())
        {
            let raw = json!({
                "title": query,
                "snippet": answer,
                "publisher": "sonar",
            });
            evidence.extend(self.store.normalize(&raw, "llm_analysis_result"));
        }

        Ok(ToolResult::Evidence(evidence))
    }
}
