//! Tool adapter layer: a registry of named provider bridges dispatched as
//! `"<provider>.<method>"` by the research executor.

pub mod exa;
pub mod llm_analyzer;
pub mod registry;
pub mod sonar;

pub use exa::ExaAdapter;
pub use llm_analyzer::LlmAnalyzerAdapter;
pub use registry::AdapterRegistry;
pub use sonar::SonarAdapter;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;

use crate::models::Evidence;

/// What an adapter invocation yields: normalized evidence or a structured
/// value bound into the variable bag.
#[derive(Debug, Clone)]
pub enum ToolResult {
    Evidence(Vec<Evidence>),
    Value(Value),
}

impl ToolResult {
    /// JSON view of the result, for `save_as` bindings.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Evidence(records) => serde_json::to_value(records).unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// Transient network or 5xx failure; retried with backoff.
    Transient,
    /// Provider reported credit exhaustion (HTTP 402 equivalent).
    Exhausted,
    /// Auth failure or bad request; never retried.
    BadRequest,
    /// Credentials for the provider are missing at call time.
    Config,
    /// The workflow deadline expired before or during the call.
    DeadlineExceeded,
}

#[derive(Debug, Error)]
#[error("{provider}.{method}: {message}")]
pub struct AdapterError {
    pub provider: String,
    pub method: String,
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(
        provider: impl Into<String>,
        method: impl Into<String>,
        kind: AdapterErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            method: method.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind == AdapterErrorKind::Transient
    }

    /// Map an HTTP status to an error kind per the retry policy: 5xx
    /// transient, 402 exhausted, remaining 4xx terminal.
    pub fn kind_for_status(status: u16) -> AdapterErrorKind {
        match status {
            402 => AdapterErrorKind::Exhausted,
            429 => AdapterErrorKind::Transient,
            s if s >= 500 => AdapterErrorKind::Transient,
            _ => AdapterErrorKind::BadRequest,
        }
    }
}

/// Remaining budget before a deadline, floored at zero.
pub fn time_remaining(deadline: Instant) -> std::time::Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// A named bridge to an external provider.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Adapter name used in `use:` targets, e.g. `"exa"`.
    fn name(&self) -> &str;

    /// Methods this adapter exposes.
    fn methods(&self) -> &[&'static str];

    /// Invoke a method. `deadline` bounds the call; implementations derive
    /// their request timeout from the time remaining.
    async fn invoke(
        &self,
        method: &str,
        inputs: &Value,
        deadline: Instant,
    ) -> Result<ToolResult, AdapterError>;
}
