//! Adapter registry and dispatch with retry policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::{AdapterError, AdapterErrorKind, ToolAdapter, ToolResult, time_remaining};
use crate::error::{Result, WorkflowError};

const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(8);
const MAX_ATTEMPTS: u32 = 3;

/// Registry of tool adapters. Registered once at startup, read-only after.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: ToolAdapter + 'static>(&mut self, adapter: A) {
        let name = adapter.name().to_string();
        self.adapters.insert(name, Arc::new(adapter));
    }

    pub fn register_arc(&mut self, adapter: Arc<dyn ToolAdapter>) {
        let name = adapter.name().to_string();
        self.adapters.insert(name, adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch a `"<provider>.<method>"` target.
    ///
    /// A missing adapter is a configuration failure, a missing method a
    /// strategy failure; both are fatal to the workflow. Transient provider
    /// errors are retried with exponential backoff (500ms base, 8s cap,
    /// 3 attempts), then degrade to `PROVIDER_UNAVAILABLE`.
    pub async fn invoke(
        &self,
        target: &str,
        inputs: &Value,
        deadline: Instant,
    ) -> Result<ToolResult> {
        let (provider, method) = target.split_once('.').ok_or_else(|| {
            WorkflowError::StrategyError(format!(
                "tool target '{target}' is not of the form '<provider>.<method>'"
            ))
        })?;

        let adapter = self.get(provider).ok_or_else(|| {
            WorkflowError::ConfigError(format!("no adapter registered for provider '{provider}'"))
        })?;

        if !adapter.methods().iter().any(|m| *m == method) {
            return Err(WorkflowError::StrategyError(format!(
                "adapter '{provider}' has no method '{method}'"
            )));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(tool = %target, attempt, "invoking adapter");

            let error = match adapter.invoke(method, inputs, deadline).await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };

            if error.retryable() && attempt < MAX_ATTEMPTS {
                let delay = backoff_delay(attempt);
                if time_remaining(deadline) > delay {
                    warn!(tool = %target, attempt, error = %error, delay_ms = delay.as_millis() as u64, "retrying adapter call");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            return Err(workflow_error(error));
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let delay = RETRY_BASE * 2u32.saturating_pow(attempt.saturating_sub(1));
    delay.min(RETRY_CAP)
}

fn workflow_error(error: AdapterError) -> WorkflowError {
    match error.kind {
        AdapterErrorKind::Exhausted => WorkflowError::ProviderExhausted(error.to_string()),
        AdapterErrorKind::DeadlineExceeded => WorkflowError::Cancelled(error.to_string()),
        AdapterErrorKind::Config => WorkflowError::ConfigError(error.to_string()),
        AdapterErrorKind::Transient | AdapterErrorKind::BadRequest => {
            WorkflowError::ProviderUnavailable(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAdapter {
        calls: AtomicU32,
        fail_first: u32,
        kind: AdapterErrorKind,
    }

    #[async_trait]
    impl ToolAdapter for FlakyAdapter {
        fn name(&self) -> &str {
            "flaky"
        }

        fn methods(&self) -> &[&'static str] {
            &["search"]
        }

        async fn invoke(
            &self,
            method: &str,
            _inputs: &Value,
            _deadline: Instant,
        ) -> std::result::Result<ToolResult, AdapterError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                return Err(AdapterError::new("flaky", method, self.kind, "boom"));
            }
            Ok(ToolResult::Value(Value::String("ok".into())))
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(120)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let mut registry = AdapterRegistry::new();
        registry.register(FlakyAdapter {
            calls: AtomicU32::new(0),
            fail_first: 2,
            kind: AdapterErrorKind::Transient,
        });

        let result = registry
            .invoke("flaky.search", &Value::Null, deadline())
            .await
            .unwrap();
        assert!(matches!(result, ToolResult::Value(Value::String(s)) if s == "ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_exhaustion_degrades_to_unavailable() {
        let mut registry = AdapterRegistry::new();
        registry.register(FlakyAdapter {
            calls: AtomicU32::new(0),
            fail_first: 10,
            kind: AdapterErrorKind::Transient,
        });

        let err = registry
            .invoke("flaky.search", &Value::Null, deadline())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PROVIDER_UNAVAILABLE");
    }

    #[tokio::test]
    async fn exhausted_is_not_retried() {
        let adapter = Arc::new(FlakyAdapter {
            calls: AtomicU32::new(0),
            fail_first: 10,
            kind: AdapterErrorKind::Exhausted,
        });
        let mut registry = AdapterRegistry::new();
        registry.register_arc(adapter.clone());

        let err = registry
            .invoke("flaky.search", &Value::Null, deadline())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PROVIDER_EXHAUSTED");
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_adapter_is_config_error() {
        let registry = AdapterRegistry::new();
        let err = registry
            .invoke("nope.search", &Value::Null, deadline())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn missing_method_is_strategy_error() {
        let mut registry = AdapterRegistry::new();
        registry.register(FlakyAdapter {
            calls: AtomicU32::new(0),
            fail_first: 0,
            kind: AdapterErrorKind::Transient,
        });
        let err = registry
            .invoke("flaky.unknown", &Value::Null, deadline())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "STRATEGY_ERROR");
    }

    #[tokio::test]
    async fn malformed_target_is_strategy_error() {
        let registry = AdapterRegistry::new();
        let err = registry
            .invoke("plainname", &Value::Null, deadline())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "STRATEGY_ERROR");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(10), Duration::from_secs(8));
    }
}
