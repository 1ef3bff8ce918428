//! LLM analyzer adapter: exposes the configured model as a plan step.
//!
//! `call` returns the completion text as a structured value for `save_as`
//! bindings; `analyze` wraps it as sentinel evidence so the synthesizer can
//! cite the analysis.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

use crate::adapters::{AdapterError, AdapterErrorKind, ToolAdapter, ToolResult, time_remaining};
use crate::error::WorkflowError;
use crate::evidence::EvidenceStore;
use crate::llm::{CompletionRequest, LlmClient, LlmFactory, Message};

pub struct LlmAnalyzerAdapter {
    factory: Arc<LlmFactory>,
    store: EvidenceStore,
}

impl LlmAnalyzerAdapter {
    pub fn new(factory: Arc<LlmFactory>) -> Self {
        Self {
            factory,
            store: EvidenceStore::default(),
        }
    }

    fn err(&self, method: &str, kind: AdapterErrorKind, message: impl Into<String>) -> AdapterError {
        AdapterError::new("llm_analyzer", method, kind, message)
    }
}

#[async_trait]
impl ToolAdapter for LlmAnalyzerAdapter {
    fn name(&self) -> &str {
        "llm_analyzer"
    }

    fn methods(&self) -> &[&'static str] {
        &["call", "analyze"]
    }

    async fn invoke(
        &self,
        method: &str,
        inputs: &Value,
        deadline: Instant,
    ) -> Result<ToolResult, AdapterError> {
        if time_remaining(deadline).is_zero() {
            return Err(self.err(
                method,
                AdapterErrorKind::DeadlineExceeded,
                "workflow deadline expired",
            ));
        }

        let prompt = inputs["prompt"].as_str().filter(|p| !p.is_empty()).ok_or_else(|| {
            self.err(method, AdapterErrorKind::BadRequest, "missing input 'prompt'")
        })?;

        let phase = self.factory.for_phase(None, "research").map_err(|e| {
            self.err(method, AdapterErrorKind::Config, e.to_string())
        })?;

        let mut messages = Vec::new();
        if let Some(system) = inputs["system"].as_str() {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let mut request = CompletionRequest::new(messages);
        if let Some(max_tokens) = inputs["max_tokens"].as_u64() {
            request = request.with_max_tokens(max_tokens as u32);
        }
        if let Some(temperature) = inputs["temperature"].as_f64() {
            request = request.with_temperature(temperature as f32);
        }

        let response = phase
            .client
            .complete(phase.apply(request))
            .await
            .map_err(|e| match e {
                WorkflowError::LlmHttp { status, message, .. } => self.err(
                    method,
                    AdapterError::kind_for_status(status),
                    format!("HTTP {status}: {message}"),
                ),
                other => self.err(method, AdapterErrorKind::Transient, other.to_string()),
            })?;

        let text = response.content.unwrap_or_default();

        match method {
            "call" => Ok(ToolResult::Value(Value::String(text))),
            "analyze" => {
                let raw = json!({
                    "title": inputs["title"].as_str().unwrap_or("analysis"),
                    "snippet": text,
                    "publisher": "llm_analyzer",
                });
                let evidence = self
                    .store
                    .normalize(&raw, "llm_analysis_result")
                    .into_iter()
                    .collect();
                Ok(ToolResult::Evidence(evidence))
            }
            other => Err(self.err(
                other,
                AdapterErrorKind::BadRequest,
                format!("unknown method '{other}'"),
            )),
        }
    }
}
