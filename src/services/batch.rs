//! Batch executor: run every active task for a frequency concurrently,
//! deliver per-task webhooks, and update run bookkeeping.
//!
//! The batch is always "successful" from the caller's perspective; per-task
//! outcomes travel over the webhook stream. A failure in one task never
//! aborts the batch.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span, warn};

use crate::engine::{WorkflowEngine, WorkflowRequest, WorkflowResult};
use crate::error::Result;
use crate::models::{Frequency, ResearchTask};
use crate::services::webhook::WebhookSender;
use crate::storage::ResearchTaskStorage;

#[derive(Debug, Clone, Serialize)]
pub struct BatchStarted {
    pub status: &'static str,
    pub tasks_found: usize,
    pub started_at: String,
}

pub struct BatchExecutor {
    engine: Arc<WorkflowEngine>,
    tasks: ResearchTaskStorage,
    webhooks: WebhookSender,
    max_concurrency: usize,
}

impl BatchExecutor {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        tasks: ResearchTaskStorage,
        webhooks: WebhookSender,
        max_concurrency: usize,
    ) -> Self {
        Self {
            engine,
            tasks,
            webhooks,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Enumerate active tasks for `frequency`, answer immediately, and run
    /// the batch in the background.
    pub fn start_batch(
        self: &Arc<Self>,
        frequency: Frequency,
        callback_url: String,
    ) -> Result<BatchStarted> {
        let tasks = self
            .tasks
            .list_active_by_frequency(frequency)
            .map_err(|e| crate::error::WorkflowError::Storage(e.to_string()))?;
        let started = BatchStarted {
            status: "running",
            tasks_found: tasks.len(),
            started_at: Utc::now().to_rfc3339(),
        };

        let executor = self.clone();
        tokio::spawn(async move {
            executor.run_batch(tasks, callback_url).await;
        });
        Ok(started)
    }

    async fn run_batch(self: Arc<Self>, tasks: Vec<ResearchTask>, callback_url: String) {
        let total = tasks.len();
        info!(total, "batch started");
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();

        for task in tasks {
            let permit = semaphore.clone().acquire_owned().await;
            let Ok(permit) = permit else {
                break;
            };
            let executor = self.clone();
            let callback_url = callback_url.clone();
            join_set.spawn(async move {
                // Each worker owns its workflow exclusively; evidence
                // merging stays single-threaded per workflow.
                let _permit = permit;
                executor.execute_task(&task, &callback_url).await;
            });
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(error) = result {
                error!(error = %error, "batch worker panicked");
            }
        }
        // Spans are emitted through the subscriber as they close; nothing
        // further to flush here beyond marking the batch boundary.
        info!(total, "batch complete");
    }

    /// Run one task's workflow and deliver its webhook. Never fails the
    /// batch; all outcomes are absorbed into logs and the webhook stream.
    pub async fn execute_task(&self, task: &ResearchTask, callback_url: &str) {
        let span = info_span!(
            "task",
            task_id = %task.id,
            user = %task.email,
            session = %task.id,
            frequency = ?task.frequency,
        );
        self.execute_task_inner(task, callback_url)
            .instrument(span)
            .await;
    }

    async fn execute_task_inner(&self, task: &ResearchTask, callback_url: &str) {
        let outcome = self
            .engine
            .run(WorkflowRequest {
                thread_id: task.id.to_string(),
                user_request: task.research_topic.clone(),
                nocache: false,
            })
            .await;

        let (payload, completed) = match outcome {
            Ok(result) => (task_payload(task, Some(&result), None), true),
            Err(error) => {
                warn!(error = %error, "task workflow failed");
                (task_payload(task, None, Some(error.to_string())), false)
            }
        };

        match self.webhooks.deliver(callback_url, &payload).await {
            Ok(()) => {
                // Delivery succeeded: the task ran for this tick, whatever
                // its outcome. A failed bookkeeping write must not fail the
                // task.
                let mut updated = task.clone();
                updated.last_run_at = Some(Utc::now());
                if let Err(error) = self.tasks.update(&updated) {
                    warn!(error = %error, "failed to update last_run_at");
                }
                if completed {
                    self.engine.clear_checkpoint(&task.id.to_string());
                }
            }
            Err(error) => {
                // last_run_at stays untouched so the next scheduler tick
                // re-executes this task.
                error!(error = %error, "webhook delivery exhausted retries");
            }
        }
    }

    /// One-off execution without a stored task; returns the shaped payload
    /// instead of delivering it.
    pub async fn execute_manual(&self, research_topic: &str, email: &str, nocache: bool) -> Value {
        let thread_id = uuid::Uuid::new_v4().to_string();
        let outcome = self
            .engine
            .run(WorkflowRequest {
                thread_id: thread_id.clone(),
                user_request: research_topic.to_string(),
                nocache,
            })
            .await;
        match outcome {
            Ok(result) => {
                self.engine.clear_checkpoint(&thread_id);
                json!({
                    "task_id": thread_id,
                    "email": email,
                    "research_topic": research_topic,
                    "status": "completed",
                    "result": result,
                })
            }
            Err(error) => json!({
                "task_id": thread_id,
                "email": email,
                "research_topic": research_topic,
                "status": "failed",
                "error": error.to_string(),
            }),
        }
    }

    /// Manual execution delivered to a callback instead of the response.
    pub async fn execute_manual_with_callback(
        &self,
        research_topic: String,
        email: String,
        callback_url: String,
    ) {
        let payload = self.execute_manual(&research_topic, &email, false).await;
        if let Err(error) = self.webhooks.deliver(&callback_url, &payload).await {
            error!(error = %error, "manual run webhook delivery failed");
        }
    }
}

fn task_payload(
    task: &ResearchTask,
    result: Option<&WorkflowResult>,
    error: Option<String>,
) -> Value {
    let mut payload = json!({
        "task_id": task.id,
        "email": task.email,
        "research_topic": task.research_topic,
        "frequency": task.frequency,
        "status": if error.is_none() { "completed" } else { "failed" },
    });
    if let Some(result) = result {
        payload["result"] = serde_json::to_value(result).unwrap_or(Value::Null);
    }
    if let Some(error) = error {
        payload["error"] = Value::String(error);
    }
    payload
}
