//! Webhook delivery with bounded retries.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, WorkflowError};

const MAX_RETRIES: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct WebhookSender {
    client: Client,
    retry_base: Duration,
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            retry_base: RETRY_BASE,
        }
    }

    /// Shrink the backoff base, for tests.
    #[cfg(test)]
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// POST `payload` as JSON to `url`.
    ///
    /// 5xx and network failures are retried up to 3 times with delays of
    /// 1s, 4s and 16s; 4xx responses fail immediately. Exhausted retries
    /// surface as `WEBHOOK_DELIVERY_FAILED`.
    pub async fn deliver(&self, url: &str, payload: &Value) -> Result<()> {
        let mut last_error = String::new();

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = self.retry_base * 4u32.saturating_pow(attempt - 1);
                debug!(url, attempt, delay_secs = delay.as_secs(), "retrying webhook");
                tokio::time::sleep(delay).await;
            }

            match self.client.post(url).json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url, attempt, "webhook delivered");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    last_error = format!("HTTP {status}");
                    if status.is_client_error() {
                        break;
                    }
                    warn!(url, %status, attempt, "webhook endpoint returned server error");
                }
                Err(error) => {
                    last_error = error.to_string();
                    warn!(url, error = %last_error, attempt, "webhook request failed");
                }
            }
        }

        Err(WorkflowError::WebhookDeliveryFailed(format!(
            "{url}: {last_error}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    struct FailTwice {
        calls: Arc<AtomicU32>,
    }

    impl Respond for FailTwice {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= 2 {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(200)
            }
        }
    }

    #[tokio::test]
    async fn retries_5xx_then_succeeds() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicU32::new(0));
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .respond_with(FailTwice {
                calls: calls.clone(),
            })
            .mount(&server)
            .await;

        let sender = WebhookSender::new().with_retry_base(Duration::from_millis(5));
        sender
            .deliver(&format!("{}/hook", server.uri()), &json!({"status": "completed"}))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let sender = WebhookSender::new().with_retry_base(Duration::from_millis(5));
        let err = sender
            .deliver(&server.uri(), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "WEBHOOK_DELIVERY_FAILED");
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WebhookSender::new();
        let err = sender
            .deliver(&server.uri(), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "WEBHOOK_DELIVERY_FAILED");
    }
}
