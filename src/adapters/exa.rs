//! Exa search adapter: neural/keyword web search, page contents, direct
//! answers and find-similar.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::{Duration, Instant};

use crate::adapters::{AdapterError, AdapterErrorKind, ToolAdapter, ToolResult, time_remaining};
use crate::config::ProviderConfig;
use crate::evidence::EvidenceStore;

const DEFAULT_BASE_URL: &str = "https://api.exa.ai";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ExaAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    store: EvidenceStore,
}

impl ExaAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: config.timeout.unwrap_or(DEFAULT_TIMEOUT),
            store: EvidenceStore::default(),
        }
    }

    fn err(&self, method: &str, kind: AdapterErrorKind, message: impl Into<String>) -> AdapterError {
        AdapterError::new("exa", method, kind, message)
    }

    async fn post(
        &self,
        method: &str,
        endpoint: &str,
        body: Value,
        deadline: Instant,
    ) -> Result<Value, AdapterError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            self.err(method, AdapterErrorKind::Config, "EXA_API_KEY is not configured")
        })?;

        let remaining = time_remaining(deadline);
        if remaining.is_zero() {
            return Err(self.err(
                method,
                AdapterErrorKind::DeadlineExceeded,
                "workflow deadline expired",
            ));
        }

        let response = self
            .client
            .post(format!("{}{endpoint}", self.base_url))
            .header("x-api-key", api_key)
            .timeout(self.timeout.min(remaining))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() && time_remaining(deadline).is_zero() {
                    AdapterErrorKind::DeadlineExceeded
                } else {
                    AdapterErrorKind::Transient
                };
                self.err(method, kind, e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(self.err(
                method,
                AdapterError::kind_for_status(status),
                format!("HTTP {status}: {body}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| self.err(method, AdapterErrorKind::Transient, e.to_string()))
    }

    fn results_to_evidence(&self, data: &Value) -> Vec<crate::models::Evidence> {
        data["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| {
                        let raw = json!({
                            "url": r["url"].as_str().unwrap_or_default(),
                            "title": r["title"].as_str().unwrap_or_default(),
                            "snippet": r["text"].as_str()
                                .or_else(|| r["summary"].as_str())
                                .unwrap_or_default(),
                            "publisher": r["author"].as_str(),
                            "published_at": r["publishedDate"].as_str(),
                        });
                        self.store.normalize(&raw, "exa")
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ToolAdapter for ExaAdapter {
    fn name(&self) -> &str {
        "exa"
    }

    fn methods(&self) -> &[&'static str] {
        &["search", "contents", "answer", "find_similar"]
    }

    async fn invoke(
        &self,
        method: &str,
        inputs: &Value,
        deadline: Instant,
    ) -> Result<ToolResult, AdapterError> {
        match method {
            "search" => {
                let query = require_str(inputs, "query")
                    .map_err(|m| self.err(method, AdapterErrorKind::BadRequest, m))?;
                let mut body = json!({
                    "query": query,
                    "numResults": inputs["num_results"].as_u64().unwrap_or(10),
                    "type": inputs["type"].as_str().unwrap_or("auto"),
                    "contents": {"text": {"maxCharacters": 500}},
                });
                if let Some(start) = inputs["start_published_date"].as_str() {
                    body["startPublishedDate"] = json!(start);
                }
                if let Some(category) = inputs["category"].as_str() {
                    body["category"] = json!(category);
                }
                let data = self.post(method, "/search", body, deadline).await?;
                Ok(ToolResult::Evidence(self.results_to_evidence(&data)))
            }
            "contents" => {
                let urls = inputs["urls"]
                    .as_array()
                    .cloned()
                    .or_else(|| inputs["urls"].as_str().map(|u| vec![json!(u)]))
                    .ok_or_else(|| {
                        self.err(method, AdapterErrorKind::BadRequest, "missing input 'urls'")
                    })?;
                let body = json!({
                    "urls": urls,
                    "text": {"maxCharacters": 500},
                });
                let data = self.post(method, "/contents", body, deadline).await?;
                Ok(ToolResult::Evidence(self.results_to_evidence(&data)))
            }
            "answer" => {
                let query = require_str(inputs, "query")
                    .map_err(|m| self.err(method, AdapterErrorKind::BadRequest, m))?;
                let body = json!({"query": query, "text": true});
                let data = self.post(method, "/answer", body, deadline).await?;

                let mut evidence = Vec::new();
                // The answer itself is sentinel evidence; its sources are
                // regular records.
                if let Some(answer) = data["answer"].as_str() {
                    let raw = json!({
                        "title": query,
                        "snippet": answer,
                        "publisher": "exa",
                    });
                    evidence.extend(self.store.normalize(&raw, "exa_answer"));
                }
                if let Some(citations) = data["citations"].as_array() {
                    for c in citations {
                        let raw = json!({
                            "url": c["url"].as_str().unwrap_or_default(),
                            "title": c["title"].as_str().unwrap_or_default(),
                            "snippet": c["text"].as_str().unwrap_or_default(),
                            "published_at": c["publishedDate"].as_str(),
                        });
                        evidence.extend(self.store.normalize(&raw, "exa"));
                    }
                }
                Ok(ToolResult::Evidence(evidence))
            }
            "find_similar" => {
                let url = require_str(inputs, "url")
                    .map_err(|m| self.err(method, AdapterErrorKind::BadRequest, m))?;
                let body = json!({
                    "url": url,
                    "numResults": inputs["num_results"].as_u64().unwrap_or(10),
                    "contents": {"text": {"maxCharacters": 500}},
                });
                let data = self.post(method, "/findSimilar", body, deadline).await?;
                Ok(ToolResult::Evidence(self.results_to_evidence(&data)))
            }
            other => Err(self.err(
                other,
                AdapterErrorKind::BadRequest,
                format!("unknown method '{other}'"),
            )),
        }
    }
}

fn require_str<'a>(inputs: &'a Value, key: &str) -> Result<&'a str, String> {
    inputs[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing input '{key}'"))
}
