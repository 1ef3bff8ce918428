//! Phase state machine: Scope → Fill → Research → Finalize → QC → Done,
//! with checkpoint resume keyed by the workflow's thread id.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, info, info_span, warn};

use crate::adapters::AdapterRegistry;
use crate::engine::research::StepExecutor;
use crate::engine::{fill, finalize, qc, research, scope};
use crate::error::{Result, WorkflowError};
use crate::evidence::EvidenceStore;
use crate::llm::LlmFactory;
use crate::models::{Phase, State, Strategy};
use crate::services::settings::SettingsService;
use crate::services::strategy::StrategyCatalog;
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    /// Task UUID for subscribed tasks, freshly minted for manual runs.
    /// Re-invocation with the same id resumes from the last completed phase.
    pub thread_id: String,
    pub user_request: String,
    /// Bypass the scope classification cache.
    pub nocache: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultMetadata {
    pub strategy_slug: String,
    pub evidence_count: usize,
    pub executed_at: String,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub sections: Vec<String>,
    pub citations: Vec<String>,
    pub metadata: ResultMetadata,
}

impl WorkflowResult {
    fn from_state(state: &State) -> Self {
        Self {
            sections: state.write.sections.clone(),
            citations: state.write.citations.clone(),
            metadata: ResultMetadata {
                strategy_slug: state.scope.strategy_slug.clone(),
                evidence_count: state.research.evidence.len(),
                executed_at: Utc::now().to_rfc3339(),
                warnings: state.write.warnings.clone(),
                errors: state.write.errors.clone(),
            },
        }
    }
}

pub struct WorkflowEngine {
    catalog: Arc<StrategyCatalog>,
    registry: Arc<AdapterRegistry>,
    llm: Arc<LlmFactory>,
    storage: Arc<Storage>,
    settings: SettingsService,
    workflow_deadline: Duration,
}

impl WorkflowEngine {
    pub fn new(
        catalog: Arc<StrategyCatalog>,
        registry: Arc<AdapterRegistry>,
        llm: Arc<LlmFactory>,
        storage: Arc<Storage>,
        settings: SettingsService,
        workflow_deadline: Duration,
    ) -> Self {
        Self {
            catalog,
            registry,
            llm,
            storage,
            settings,
            workflow_deadline,
        }
    }

    /// Execute (or resume) a workflow to completion.
    pub async fn run(&self, request: WorkflowRequest) -> Result<WorkflowResult> {
        let span = info_span!("workflow", thread_id = %request.thread_id);
        self.run_phases(request).instrument(span).await
    }

    async fn run_phases(&self, request: WorkflowRequest) -> Result<WorkflowResult> {
        let deadline = Instant::now() + self.workflow_deadline;
        let mut state = self.load_or_create(&request);
        if state.phase != Phase::Scope {
            info!(phase = state.phase.as_str(), "resuming from checkpoint");
        }

        // The evidence store carries this run's injectable score weights.
        let store = EvidenceStore::with_weights(self.settings.score_weights());

        while state.phase != Phase::Done {
            let phase = state.phase;
            self.run_phase(phase, &mut state, &store, deadline, request.nocache)
                .instrument(info_span!("phase", name = phase.as_str()))
                .await?;

            state.phase = phase.next().unwrap_or(Phase::Done);
            if let Err(error) = self.storage.checkpoints.save(&state) {
                warn!(error = %error, "failed to persist checkpoint");
            }
        }

        Ok(WorkflowResult::from_state(&state))
    }

    async fn run_phase(
        &self,
        phase: Phase,
        state: &mut State,
        store: &EvidenceStore,
        deadline: Instant,
        nocache: bool,
    ) -> Result<()> {
        match phase {
            Phase::Scope => {
                let snapshot = self.catalog.snapshot();
                let llm = self.llm.for_phase(None, "scope")?;
                let user_request = state.scope.user_request.clone();
                let outcome = scope::classify(
                    &llm,
                    &snapshot,
                    &self.storage.scope_cache,
                    &user_request,
                    nocache,
                )
                .await?;
                state.scope.category = outcome.category;
                state.scope.time_window = outcome.time_window;
                state.scope.depth = outcome.depth;
                state.scope.strategy_slug = outcome.strategy_slug;
                state.research.tasks = outcome.tasks;
                for (name, value) in &outcome.variables {
                    state.write.vars.insert(name.clone(), value.to_value());
                }
                state.write.vars.insert(
                    "depth".into(),
                    serde_json::to_value(state.scope.depth).unwrap_or(Value::Null),
                );
                Ok(())
            }
            Phase::Fill => {
                let strategy = self.resolve_strategy(state)?;
                let llm = self.llm.for_phase(Some(&strategy), "fill")?;
                fill::materialize_plan(&llm, &strategy, state).await
            }
            Phase::Research => {
                let strategy = self.resolve_strategy(state)?;
                let refine_llm = self.llm.for_phase(Some(&strategy), "research").ok();
                research::run_research(
                    &self.registry,
                    store,
                    refine_llm.as_ref(),
                    &strategy,
                    self.refine_threshold(&strategy),
                    state,
                    deadline,
                )
                .await
            }
            Phase::Finalize => {
                let strategy = self.resolve_strategy(state)?;
                let llm = self.llm.for_phase(Some(&strategy), "finalize")?;
                let mut executor = StepExecutor {
                    registry: &self.registry,
                    store,
                    refine_llm: None,
                    strategy: &strategy,
                    deadline,
                    min_refine_threshold: self.refine_threshold(&strategy),
                    llm_queries_used: 0,
                };
                finalize::run_finalize(&mut executor, &llm, &strategy, state).await
            }
            Phase::Qc => {
                let strategy = self.resolve_strategy(state)?;
                let llm = if self.settings.qc_llm_enabled() {
                    self.llm.for_phase(Some(&strategy), "qc").ok()
                } else {
                    None
                };
                qc::run_qc(llm.as_ref(), &strategy, state).await;
                Ok(())
            }
            Phase::Done => Ok(()),
        }
    }

    fn load_or_create(&self, request: &WorkflowRequest) -> State {
        if let Ok(Some(saved)) = self.storage.checkpoints.load(&request.thread_id)
            && saved.scope.user_request == request.user_request
            && saved.phase != Phase::Done
        {
            return saved;
        }
        State::new(request.thread_id.clone(), request.user_request.clone())
    }

    /// Strategies are re-resolved from the catalog snapshot at the start of
    /// each phase, so catalog updates land between phases, not inside one.
    fn resolve_strategy(&self, state: &State) -> Result<Strategy> {
        let slug = &state.scope.strategy_slug;
        let record = self.catalog.get(slug).ok_or_else(|| {
            WorkflowError::StrategyError(format!("strategy '{slug}' disappeared mid-flight"))
        })?;
        Ok(record.strategy)
    }

    fn refine_threshold(&self, strategy: &Strategy) -> usize {
        strategy
            .limits
            .min_refine_threshold
            .unwrap_or_else(|| self.settings.min_refine_threshold())
    }

    /// Drop the thread's checkpoint once its result has been delivered.
    pub fn clear_checkpoint(&self, thread_id: &str) {
        if let Err(error) = self.storage.checkpoints.clear(thread_id) {
            warn!(error = %error, thread_id, "failed to clear checkpoint");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterError, ToolAdapter, ToolResult};
    use crate::llm::{MockLlmClient, MockStep};
    use crate::models::Evidence;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticSearch;

    #[async_trait]
    impl ToolAdapter for StaticSearch {
        fn name(&self) -> &str {
            "sonar"
        }

        fn methods(&self) -> &[&'static str] {
            &["search", "overview"]
        }

        async fn invoke(
            &self,
            _method: &str,
            _inputs: &Value,
            _deadline: Instant,
        ) -> std::result::Result<ToolResult, AdapterError> {
            Ok(ToolResult::Evidence(vec![
                Evidence {
                    url: "https://example.com/one".into(),
                    title: "One".into(),
                    snippet: "first".into(),
                    publisher: "Example".into(),
                    published_at: Some(Utc::now().date_naive()),
                    tool: "sonar".into(),
                    score: 0.0,
                    raw: None,
                },
                Evidence {
                    url: "https://example.com/two".into(),
                    title: "Two".into(),
                    snippet: "second".into(),
                    publisher: "Example".into(),
                    published_at: Some(Utc::now().date_naive()),
                    tool: "sonar".into(),
                    score: 0.0,
                    raw: None,
                },
            ]))
        }
    }

    const REPORT: &str =
        "## Overview\nPer https://example.com/one and https://example.com/two, things moved.";

    fn scope_call() -> MockStep {
        MockStep::ToolCall {
            name: "set_scope".into(),
            arguments: json!({
                "strategy_slug": "news/brief",
                "category": "news",
                "time_window": "day",
                "depth": "brief",
                "tasks": ["scan coverage"],
                "variables": {"topic": "AI regulation"}
            }),
        }
    }

    fn engine_with(
        steps: Vec<MockStep>,
        deadline: Duration,
    ) -> (WorkflowEngine, tempfile::TempDir) {
        let (storage, tmp) = Storage::new_in_temp().unwrap();
        let catalog = StrategyCatalog::open(
            storage.strategies.clone(),
            std::path::Path::new("/nonexistent"),
        )
        .unwrap();
        let strategy: Strategy = serde_yaml::from_str(
            r#"
meta: {slug: news/brief, version: 1, category: news, time_window: day, depth: brief}
fan_out: task
tool_chain:
  - name: sonar_overview
    params: {query: "latest on {{topic}}"}
render: {sections: ["Overview"]}
finalize: {reactive: false, instructions: "Be brief."}
limits: {min_citations: 1}
"#,
        )
        .unwrap();
        catalog.create(&strategy).unwrap();

        let mut registry = AdapterRegistry::new();
        registry.register(StaticSearch);

        let llm = LlmFactory::fixed(Arc::new(MockLlmClient::from_steps(steps)));
        let settings = SettingsService::new(storage.settings.clone());
        let engine = WorkflowEngine::new(
            Arc::new(catalog),
            Arc::new(registry),
            Arc::new(llm),
            storage,
            settings,
            deadline,
        );
        (engine, tmp)
    }

    #[tokio::test]
    async fn full_pipeline_produces_cited_report() {
        let (engine, _tmp) = engine_with(
            vec![scope_call(), MockStep::Text(REPORT.into())],
            Duration::from_secs(60),
        );

        let result = engine
            .run(WorkflowRequest {
                thread_id: "t-1".into(),
                user_request: "what changed in AI regulation".into(),
                nocache: false,
            })
            .await
            .unwrap();

        assert_eq!(result.metadata.strategy_slug, "news/brief");
        assert_eq!(result.metadata.evidence_count, 2);
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.citations.len(), 2);
        assert!(result.metadata.warnings.is_empty(), "{:?}", result.metadata.warnings);
    }

    #[tokio::test]
    async fn rerun_with_same_thread_id_is_idempotent() {
        // Second run resumes from the Done-adjacent checkpoint's cleared
        // state; evidence dedupe keeps the set equal.
        let (engine, _tmp) = engine_with(
            vec![
                scope_call(),
                MockStep::Text(REPORT.into()),
                MockStep::Text(REPORT.into()),
            ],
            Duration::from_secs(60),
        );

        let first = engine
            .run(WorkflowRequest {
                thread_id: "t-1".into(),
                user_request: "what changed in AI regulation".into(),
                nocache: false,
            })
            .await
            .unwrap();
        // The finished checkpoint is not resumed; the rerun replays from
        // scope using the cached classification.
        let second = engine
            .run(WorkflowRequest {
                thread_id: "t-1".into(),
                user_request: "what changed in AI regulation".into(),
                nocache: false,
            })
            .await
            .unwrap();

        let urls = |r: &WorkflowResult| {
            let mut c = r.citations.clone();
            c.sort();
            c
        };
        assert_eq!(first.metadata.evidence_count, second.metadata.evidence_count);
        assert_eq!(urls(&first), urls(&second));
    }

    #[tokio::test]
    async fn scope_failure_aborts_without_fallback() {
        let (engine, _tmp) = engine_with(
            vec![MockStep::Error("llm down".into())],
            Duration::from_secs(60),
        );

        let err = engine
            .run(WorkflowRequest {
                thread_id: "t-err".into(),
                user_request: "anything".into(),
                nocache: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SCOPE_FAILED");
    }

    #[tokio::test]
    async fn expired_deadline_cancels_research() {
        let (engine, _tmp) = engine_with(
            vec![scope_call(), MockStep::Text(REPORT.into())],
            Duration::ZERO,
        );

        let err = engine
            .run(WorkflowRequest {
                thread_id: "t-dead".into(),
                user_request: "anything".into(),
                nocache: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CANCELLED");
    }

    #[tokio::test]
    async fn checkpoint_resumes_after_mid_flight_failure() {
        // First attempt dies in finalize (script exhausted after scope);
        // the checkpoint holds the research-complete state, so the retry
        // resumes at finalize without re-running scope or research.
        let (engine, _tmp) = engine_with(
            vec![scope_call(), MockStep::Error("flaky".into()), MockStep::Text(REPORT.into())],
            Duration::from_secs(60),
        );

        let request = WorkflowRequest {
            thread_id: "t-resume".into(),
            user_request: "what changed in AI regulation".into(),
            nocache: false,
        };

        let err = engine.run(request.clone()).await.unwrap_err();
        assert_eq!(err.kind(), "LLM_ERROR");

        let result = engine.run(request).await.unwrap();
        assert_eq!(result.metadata.evidence_count, 2);
        assert_eq!(result.sections.len(), 1);
    }
}

