//! Deterministic scripted LLM client for engine tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, WorkflowError};
use crate::llm::client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, ToolCall,
};

/// Deterministic step for scripted mock completions.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Return a plain assistant message.
    Text(String),
    /// Return a tool call response.
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    /// Return an LLM error.
    Error(String),
}

/// A mock LLM client that replays a fixed script, one step per call.
///
/// An exhausted script returns an error, which makes over-calling visible in
/// tests. The number of calls made is observable through `calls()`.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    model: String,
    script: Arc<Mutex<VecDeque<MockStep>>>,
    calls: Arc<AtomicUsize>,
}

impl MockLlmClient {
    pub fn from_steps(steps: Vec<MockStep>) -> Self {
        Self {
            model: "mock".to_string(),
            script: Arc::new(Mutex::new(steps.into())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::from_steps(vec![MockStep::Text(content.into())])
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::from_steps(vec![MockStep::ToolCall {
            name: name.into(),
            arguments,
        }])
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| WorkflowError::Llm("mock script exhausted".into()))?;

        match step {
            MockStep::Text(content) => Ok(CompletionResponse {
                content: Some(content),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
                citations: vec![],
            }),
            MockStep::ToolCall { name, arguments } => Ok(CompletionResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: format!("call_{}", self.calls()),
                    name,
                    arguments,
                }],
                finish_reason: FinishReason::ToolCalls,
                citations: vec![],
            }),
            MockStep::Error(message) => Err(WorkflowError::Llm(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::Message;

    #[tokio::test]
    async fn replays_script_in_order() {
        let client = MockLlmClient::from_steps(vec![
            MockStep::Text("first".into()),
            MockStep::Text("second".into()),
        ]);

        let r1 = client
            .complete(CompletionRequest::new(vec![Message::user("a")]))
            .await
            .unwrap();
        let r2 = client
            .complete(CompletionRequest::new(vec![Message::user("b")]))
            .await
            .unwrap();
        assert_eq!(r1.content.as_deref(), Some("first"));
        assert_eq!(r2.content.as_deref(), Some("second"));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let client = MockLlmClient::text("only");
        client
            .complete(CompletionRequest::new(vec![Message::user("a")]))
            .await
            .unwrap();
        assert!(
            client
                .complete(CompletionRequest::new(vec![Message::user("b")]))
                .await
                .is_err()
        );
    }
}
