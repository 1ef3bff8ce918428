//! Fill phase: compute time-window variables and materialize the runtime
//! plan, optionally asking the LLM to populate whitelisted step inputs.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{Result, WorkflowError};
use crate::llm::{CompletionRequest, LlmClient, Message, PhaseLlm};
use crate::models::{State, Step, Strategy, TimeWindow};

pub const RUNTIME_PLAN_VAR: &str = "runtime_plan";

/// Built-in time variables derived from the scope's window.
pub fn time_window_vars(window: TimeWindow, now: DateTime<Utc>) -> Vec<(String, Value)> {
    let today = now.date_naive();
    let start = today - Duration::days(window.days());
    vec![
        ("current_date".into(), json!(today.to_string())),
        ("start_date".into(), json!(start.to_string())),
        ("end_date".into(), json!(today.to_string())),
        (
            "search_recency_filter".into(),
            json!(window.recency_filter()),
        ),
    ]
}

/// Materialize the runtime plan from the strategy's tool chain and store it
/// under `vars.runtime_plan`.
pub async fn materialize_plan(
    llm: &PhaseLlm,
    strategy: &Strategy,
    state: &mut State,
) -> Result<()> {
    for (key, value) in time_window_vars(state.scope.time_window, Utc::now()) {
        state.write.vars.insert(key, value);
    }

    let mut plan = strategy.tool_chain.clone();
    for (idx, step) in plan.iter_mut().enumerate() {
        let Step::Extended(step) = step else {
            continue;
        };
        if step.llm_fill.is_empty() {
            continue;
        }
        debug!(step = idx, keys = ?step.llm_fill, "filling step inputs");
        let filled = fill_inputs(llm, state, step).await?;
        for (key, value) in filled {
            step.inputs.insert(key, value);
        }
    }

    state
        .write
        .vars
        .insert(RUNTIME_PLAN_VAR.into(), serde_json::to_value(&plan)?);
    Ok(())
}

/// The finalized plan, read back from the variable bag.
pub fn runtime_plan(state: &State) -> Result<Vec<Step>> {
    let value = state.write.vars.get(RUNTIME_PLAN_VAR).ok_or_else(|| {
        WorkflowError::FillFailed("runtime plan missing from state".into())
    })?;
    Ok(serde_json::from_value(value.clone())?)
}

async fn fill_inputs(
    llm: &PhaseLlm,
    state: &State,
    step: &crate::models::strategy::ExtendedStep,
) -> Result<Map<String, Value>> {
    let context = json!({
        "user_request": state.scope.user_request,
        "tasks": state.research.tasks,
        "variables": state.write.vars,
        "step": {
            "use": step.use_,
            "description": step.description,
            "inputs": step.inputs,
        },
    });

    let system = format!(
        "You prepare inputs for one step of a research plan. Given the request \
         context, respond with a JSON object containing exactly these keys and \
         nothing else: {}. Values must be strings, numbers, booleans or arrays \
         of strings.",
        step.llm_fill.join(", ")
    );

    let request = CompletionRequest::new(vec![
        Message::system(system),
        Message::user(context.to_string()),
    ])
    .with_json_response();

    let response = llm
        .client
        .complete(llm.apply(request))
        .await
        .map_err(|e| WorkflowError::FillFailed(format!("fill call failed: {e}")))?;

    let content = response
        .content
        .ok_or_else(|| WorkflowError::FillFailed("fill call returned no content".into()))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| WorkflowError::FillFailed(format!("fill response is not JSON: {e}")))?;
    let Value::Object(object) = value else {
        return Err(WorkflowError::FillFailed(
            "fill response is not a JSON object".into(),
        ));
    };

    for key in object.keys() {
        if !step.llm_fill.iter().any(|k| k == key) {
            return Err(WorkflowError::FillFailed(format!(
                "fill response contains unexpected key '{key}'"
            )));
        }
    }
    for key in &step.llm_fill {
        if !object.contains_key(key) {
            return Err(WorkflowError::FillFailed(format!(
                "fill response is missing required key '{key}'"
            )));
        }
    }
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmFactory, MockLlmClient};
    use crate::models::Phase;
    use std::sync::Arc;

    fn strategy_with_fill() -> Strategy {
        serde_yaml::from_str(
            r#"
meta: {slug: s, version: 1, category: news, time_window: week, depth: overview}
tool_chain:
  - name: sonar_overview
    params: {query: "{{topic}}"}
  - use: exa.search
    inputs: {num_results: 5}
    llm_fill: [query]
"#,
        )
        .unwrap()
    }

    fn state() -> State {
        let mut state = State::new("t", "what changed");
        state.phase = Phase::Fill;
        state.scope.time_window = TimeWindow::Week;
        state
    }

    fn phase(client: MockLlmClient) -> PhaseLlm {
        LlmFactory::fixed(Arc::new(client)).for_phase(None, "fill").unwrap()
    }

    #[test]
    fn time_vars_cover_the_window() {
        let now = DateTime::parse_from_rfc3339("2026-08-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let vars: std::collections::HashMap<_, _> =
            time_window_vars(TimeWindow::Week, now).into_iter().collect();
        assert_eq!(vars["current_date"], json!("2026-08-01"));
        assert_eq!(vars["start_date"], json!("2026-07-25"));
        assert_eq!(vars["search_recency_filter"], json!("week"));
    }

    #[tokio::test]
    async fn plan_fills_whitelisted_keys() {
        let llm = phase(MockLlmClient::text(r#"{"query": "filled query"}"#));
        let mut state = state();
        materialize_plan(&llm, &strategy_with_fill(), &mut state)
            .await
            .unwrap();

        let plan = runtime_plan(&state).unwrap();
        assert_eq!(plan.len(), 2);
        match &plan[1] {
            Step::Extended(step) => {
                assert_eq!(step.inputs["query"], json!("filled query"));
                assert_eq!(step.inputs["num_results"], json!(5));
            }
            other => panic!("expected extended step, got {other:?}"),
        }
        assert!(state.write.vars.contains_key("search_recency_filter"));
    }

    #[tokio::test]
    async fn unknown_keys_are_rejected() {
        let llm = phase(MockLlmClient::text(
            r#"{"query": "q", "sneaky": "extra"}"#,
        ));
        let mut state = state();
        let err = materialize_plan(&llm, &strategy_with_fill(), &mut state)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FILL_FAILED");
        assert!(err.to_string().contains("sneaky"));
    }

    #[tokio::test]
    async fn missing_keys_fail() {
        let llm = phase(MockLlmClient::text(r#"{}"#));
        let mut state = state();
        let err = materialize_plan(&llm, &strategy_with_fill(), &mut state)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FILL_FAILED");
    }

    #[tokio::test]
    async fn non_json_response_fails() {
        let llm = phase(MockLlmClient::text("certainly! here is the query"));
        let mut state = state();
        let err = materialize_plan(&llm, &strategy_with_fill(), &mut state)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FILL_FAILED");
    }

    #[tokio::test]
    async fn steps_without_fill_skip_the_llm() {
        let strategy: Strategy = serde_yaml::from_str(
            r#"
meta: {slug: s, version: 1, category: news, time_window: day, depth: brief}
tool_chain:
  - name: sonar_overview
    params: {query: "{{topic}}"}
"#,
        )
        .unwrap();
        let client = MockLlmClient::from_steps(vec![]);
        let llm = phase(client.clone());
        let mut state = state();
        materialize_plan(&llm, &strategy, &mut state).await.unwrap();
        assert_eq!(client.calls(), 0);
        assert_eq!(runtime_plan(&state).unwrap().len(), 1);
    }
}
