//! Research phase: iterate the runtime plan under the strategy's fan-out
//! mode, execute steps through the adapter registry, and accumulate
//! evidence.
//!
//! Step failures never abort the workflow; only scope failure, malformed
//! strategies, missing provider configuration, cancellation, and an empty
//! evidence pool at the end of research are fatal.

use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::adapters::{AdapterRegistry, ToolResult, time_remaining};
use crate::engine::condition;
use crate::engine::fill::runtime_plan;
use crate::error::{Result, WorkflowError};
use crate::evidence::EvidenceStore;
use crate::llm::{CompletionRequest, LlmClient, Message, PhaseLlm};
use crate::models::{FanOut, State, Step, StepPhase, Strategy};

/// Reserved binding for the current `foreach` element.
const ITEM_VAR: &str = "_item";

/// Legacy step names routed to the built-in dispatch table. The bool marks
/// search steps, which participate in query refinement.
fn legacy_target(name: &str) -> Option<(&'static str, bool)> {
    match name {
        "sonar_search" => Some(("sonar.search", true)),
        "sonar_overview" => Some(("sonar.overview", true)),
        "exa_search" | "exa_search_semantic" | "exa_search_keyword" => Some(("exa.search", true)),
        "exa_contents" => Some(("exa.contents", false)),
        "exa_answer" => Some(("exa.answer", false)),
        "exa_find_similar" => Some(("exa.find_similar", false)),
        _ => None,
    }
}

/// Executes plan steps for one phase. Shared between the research phase and
/// the finalize phase's `phase: finalize` steps.
pub struct StepExecutor<'a> {
    pub registry: &'a AdapterRegistry,
    pub store: &'a EvidenceStore,
    /// Client used for query refinement; `None` disables refinement.
    pub refine_llm: Option<&'a PhaseLlm>,
    pub strategy: &'a Strategy,
    pub deadline: Instant,
    pub min_refine_threshold: usize,
    /// LLM calls spent on refinement and finalize tool use, bounded by
    /// `limits.max_llm_queries`.
    pub llm_queries_used: usize,
}

impl StepExecutor<'_> {
    /// Run all steps of `phase` from `plan` under the given iteration
    /// bindings, mutating the plan in place when refinement rewrites a
    /// query.
    pub async fn run_steps(
        &mut self,
        state: &mut State,
        plan: &mut [Step],
        phase: StepPhase,
        bindings: &HashMap<String, Value>,
    ) -> Result<()> {
        for idx in 0..plan.len() {
            if plan[idx].phase() != phase {
                continue;
            }
            if time_remaining(self.deadline).is_zero() {
                return Err(WorkflowError::Cancelled(
                    "workflow deadline expired during step execution".into(),
                ));
            }

            let step = plan[idx].clone();
            let span = info_span!("step", index = idx, kind = %step_label(&step));
            let produced = self
                .run_one_step(state, &step, bindings)
                .instrument(span)
                .await?;

            // Query refinement applies only between consecutive legacy
            // search steps: a thin harvest rewrites the next query.
            if let (Some(count), Some(next_idx)) = (produced, idx.checked_add(1))
                && count < self.min_refine_threshold
                && is_legacy_search(&step)
                && plan.get(next_idx).is_some_and(is_legacy_search)
            {
                self.refine_next_query(state, plan, next_idx, bindings, count)
                    .await;
            }
        }
        Ok(())
    }

    /// Execute a single step (including its `foreach` expansion). Returns
    /// the number of evidence records produced when the step is a search
    /// step, for the refinement heuristic.
    async fn run_one_step(
        &mut self,
        state: &mut State,
        step: &Step,
        bindings: &HashMap<String, Value>,
    ) -> Result<Option<usize>> {
        let context = step_context(state, bindings, None);

        let (when, foreach, save_as) = match step {
            Step::Extended(s) => (s.when.as_deref(), s.foreach.as_deref(), s.save_as.as_deref()),
            Step::Legacy(_) => (None, None, None),
        };

        if let Some(expression) = when {
            let mut warnings = Vec::new();
            let keep = condition::evaluate(expression, &context, &mut warnings);
            state.write.warnings.extend(warnings);
            if !keep {
                debug!(expression, "step skipped by when guard");
                return Ok(None);
            }
        }

        if let Some(var) = foreach {
            let Some(Value::Array(items)) = crate::template::resolve_path(&context, var) else {
                state
                    .write
                    .warnings
                    .push(format!("foreach: '{var}' is not a sequence, step skipped"));
                return Ok(None);
            };
            let mut collected = Vec::new();
            let mut produced = 0usize;
            for item in items {
                let item_context = step_context(state, bindings, Some(&item));
                if let Some((result, count)) = self.dispatch(state, step, &item_context).await? {
                    produced += count;
                    collected.push(result.to_value());
                }
            }
            if let Some(name) = save_as {
                // Each iteration's result accumulates into a sequence.
                state
                    .write
                    .vars
                    .insert(name.to_string(), Value::Array(collected));
            }
            return Ok(Some(produced));
        }

        match self.dispatch(state, step, &context).await? {
            Some((result, count)) => {
                if let Some(name) = save_as {
                    state.write.vars.insert(name.to_string(), result.to_value());
                }
                Ok(Some(count))
            }
            None => Ok(None),
        }
    }

    /// Render inputs and invoke the adapter. Returns `None` when the step
    /// failed non-fatally (recorded on the state) or was skipped.
    async fn dispatch(
        &mut self,
        state: &mut State,
        step: &Step,
        context: &Value,
    ) -> Result<Option<(ToolResult, usize)>> {
        let (target, inputs) = match step {
            Step::Legacy(legacy) => {
                let Some((target, is_search)) = legacy_target(&legacy.name) else {
                    return Err(WorkflowError::StrategyError(format!(
                        "unknown built-in step '{}'",
                        legacy.name
                    )));
                };
                let mut inputs = self.render_inputs(state, &legacy.params, context);
                self.resolve_legacy_query(state, &mut inputs, context);
                if is_search {
                    inject_search_defaults(&mut inputs, &legacy.name, context);
                }
                (target.to_string(), inputs)
            }
            Step::Extended(extended) => {
                let mut inputs = self.render_inputs(state, &extended.inputs, context);
                if let Some(max_tokens) = extended.max_tokens {
                    inputs
                        .entry("max_tokens".to_string())
                        .or_insert(json!(max_tokens));
                }
                (extended.use_.clone(), inputs)
            }
        };

        let result = self
            .registry
            .invoke(&target, &Value::Object(inputs), self.deadline)
            .await;

        match result {
            Ok(ToolResult::Evidence(mut records)) => {
                self.store.rescore(&mut records, state.scope.time_window);
                let count = records.len();
                self.store
                    .merge(&mut state.research.evidence, records.clone());
                debug!(tool = %target, count, "step produced evidence");
                Ok(Some((ToolResult::Evidence(records), count)))
            }
            Ok(result @ ToolResult::Value(_)) => Ok(Some((result, 0))),
            Err(error @ WorkflowError::ProviderExhausted(_)) => {
                warn!(tool = %target, error = %error, "provider exhausted, step skipped");
                state.write.warnings.push(error.to_string());
                Ok(None)
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                warn!(tool = %target, error = %error, "step failed, continuing");
                state.write.errors.push(error.to_string());
                Ok(None)
            }
        }
    }

    fn render_inputs(
        &self,
        state: &mut State,
        inputs: &Map<String, Value>,
        context: &Value,
    ) -> Map<String, Value> {
        let mut warnings = Vec::new();
        let rendered = render_value_tree(&Value::Object(inputs.clone()), context, &mut warnings);
        state.write.warnings.extend(warnings);
        match rendered {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Legacy steps may reference a named query template instead of an
    /// inline one.
    fn resolve_legacy_query(&self, state: &mut State, inputs: &mut Map<String, Value>, context: &Value) {
        if inputs.contains_key("query") {
            return;
        }
        let Some(name) = inputs.get("query_name").and_then(Value::as_str) else {
            return;
        };
        let Some(template) = self.strategy.queries.get(name) else {
            state
                .write
                .warnings
                .push(format!("query template '{name}' not found"));
            return;
        };
        let mut warnings = Vec::new();
        let query = crate::template::render(template, context, &mut warnings);
        state.write.warnings.extend(warnings);
        inputs.remove("query_name");
        inputs.insert("query".into(), Value::String(query));
    }

    async fn refine_next_query(
        &mut self,
        state: &mut State,
        plan: &mut [Step],
        next_idx: usize,
        bindings: &HashMap<String, Value>,
        produced: usize,
    ) {
        let Some(llm) = self.refine_llm else {
            return;
        };
        if self.llm_queries_used >= self.strategy.limits.max_llm_queries() {
            return;
        }
        let Some(Step::Legacy(next)) = plan.get(next_idx) else {
            return;
        };
        let context = step_context(state, bindings, None);
        let mut warnings = Vec::new();
        let current_query = next
            .params
            .get("query")
            .and_then(Value::as_str)
            .map(|q| crate::template::render(q, &context, &mut warnings))
            .unwrap_or_default();
        if current_query.is_empty() {
            return;
        }

        self.llm_queries_used += 1;
        let prompt = format!(
            "The previous search for this research task returned only {produced} \
             usable sources. Rewrite the next search query to surface more \
             relevant results. Respond with the query text only.\n\n\
             Task: {}\nPlanned query: {current_query}",
            context["topic"].as_str().unwrap_or_default(),
        );
        let request = CompletionRequest::new(vec![Message::user(prompt)]);

        match llm.client.complete(llm.apply(request)).await {
            Ok(response) => {
                if let Some(refined) = response.content.map(|c| c.trim().to_string())
                    && !refined.is_empty()
                {
                    info!(from = %current_query, to = %refined, "refined next search query");
                    if let Some(Step::Legacy(next)) = plan.get_mut(next_idx) {
                        next.params.insert("query".into(), Value::String(refined));
                    }
                }
            }
            Err(error) => {
                debug!(error = %error, "query refinement failed, keeping planned query");
            }
        }
    }
}

fn step_label(step: &Step) -> String {
    match step {
        Step::Legacy(s) => s.name.clone(),
        Step::Extended(s) => s.use_.clone(),
    }
}

fn is_legacy_search(step: &Step) -> bool {
    matches!(step, Step::Legacy(s) if legacy_target(&s.name).is_some_and(|(_, search)| search))
}

/// Assemble the variable context for one step execution: state vars and
/// scope fields, shadowed by iteration bindings, shadowed by `_item`.
fn step_context(
    state: &State,
    bindings: &HashMap<String, Value>,
    item: Option<&Value>,
) -> Value {
    let mut context = state.template_context();
    if let Value::Object(map) = &mut context {
        for (key, value) in bindings {
            map.insert(key.clone(), value.clone());
        }
        if let Some(item) = item {
            map.insert(ITEM_VAR.into(), item.clone());
        }
    }
    context
}

fn render_value_tree(value: &Value, context: &Value, warnings: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => Value::String(crate::template::render(s, context, warnings)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value_tree(v, context, warnings)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value_tree(v, context, warnings))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Inject window defaults into search inputs that omit them, and map the
/// legacy name variants onto the provider's search type.
fn inject_search_defaults(inputs: &mut Map<String, Value>, name: &str, context: &Value) {
    match name {
        "exa_search_semantic" => {
            inputs.entry("type".to_string()).or_insert(json!("neural"));
        }
        "exa_search_keyword" => {
            inputs.entry("type".to_string()).or_insert(json!("keyword"));
        }
        _ => {}
    }
    if name.starts_with("sonar") {
        if let Some(recency) = context.get("search_recency_filter") {
            inputs
                .entry("search_recency_filter".to_string())
                .or_insert(recency.clone());
        }
    } else if let Some(start) = context.get("start_date") {
        inputs
            .entry("start_published_date".to_string())
            .or_insert(start.clone());
    }
}

/// Iteration bindings for the strategy's fan-out mode.
fn fan_out_bindings(strategy: &Strategy, state: &State) -> Result<Vec<HashMap<String, Value>>> {
    match &strategy.fan_out {
        FanOut::None => {
            let topic = state
                .write
                .vars
                .get("topic")
                .cloned()
                .unwrap_or_else(|| Value::String(state.scope.user_request.clone()));
            Ok(vec![HashMap::from([("topic".to_string(), topic)])])
        }
        FanOut::Task => Ok(state
            .research
            .tasks
            .iter()
            .map(|task| {
                let mut bindings =
                    HashMap::from([("topic".to_string(), Value::String(task.clone()))]);
                if let Some((_, subtopic)) = task.split_once(':') {
                    bindings.insert(
                        "subtopic".to_string(),
                        Value::String(subtopic.trim().to_string()),
                    );
                }
                bindings
            })
            .collect()),
        FanOut::Var { var, map_to, limit } => {
            let target = map_to.clone().unwrap_or_else(|| "topic".to_string());
            let items = match state.write.vars.get(var) {
                Some(Value::Array(items)) => items.clone(),
                Some(other) => vec![other.clone()],
                None => Vec::new(),
            };
            let cap = limit.unwrap_or(usize::MAX);
            Ok(items
                .into_iter()
                .take(cap)
                .map(|item| HashMap::from([(target.clone(), item)]))
                .collect())
        }
    }
}

/// Run the research phase: fan out, execute plan steps, trim evidence to
/// the strategy budget.
#[allow(clippy::too_many_arguments)]
pub async fn run_research(
    registry: &AdapterRegistry,
    store: &EvidenceStore,
    refine_llm: Option<&PhaseLlm>,
    strategy: &Strategy,
    min_refine_threshold: usize,
    state: &mut State,
    deadline: Instant,
) -> Result<()> {
    let mut plan = runtime_plan(state)?;
    let iterations = fan_out_bindings(strategy, state)?;
    info!(
        iterations = iterations.len(),
        steps = plan.len(),
        "starting research"
    );

    let mut executor = StepExecutor {
        registry,
        store,
        refine_llm,
        strategy,
        deadline,
        min_refine_threshold,
        llm_queries_used: 0,
    };

    for (idx, bindings) in iterations.iter().enumerate() {
        executor
            .run_steps(state, &mut plan, StepPhase::Research, bindings)
            .instrument(info_span!("iteration", index = idx))
            .await?;
    }

    let evidence = std::mem::take(&mut state.research.evidence);
    state.research.evidence = store.filter(evidence, strategy.limits.max_results());

    if state.research.evidence.is_empty() {
        return Err(WorkflowError::NoEvidence(
            "research produced no evidence for this request".into(),
        ));
    }
    info!(evidence = state.research.evidence.len(), "research complete");
    Ok(())
}
