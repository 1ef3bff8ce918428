//! Scope classifier: the single LLM-gated entry point that maps a free-text
//! request onto a strategy, a task list and a typed variable bag.
//!
//! The classification is cached by request fingerprint; validation failures
//! are fatal (`SCOPE_FAILED`) with no heuristic fallback.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{Result, WorkflowError};
use crate::llm::{CompletionRequest, LlmClient, Message, PhaseLlm, ToolChoice, ToolSchema};
use crate::models::{Depth, TimeWindow};
use crate::services::strategy::CatalogSnapshot;
use crate::storage::ScopeCacheStorage;

const SET_SCOPE_TOOL: &str = "set_scope";

/// A scope variable: a string or a list of strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScopeVar {
    One(String),
    Many(Vec<String>),
}

impl ScopeVar {
    pub fn to_value(&self) -> Value {
        match self {
            Self::One(s) => Value::String(s.clone()),
            Self::Many(items) => {
                Value::Array(items.iter().map(|s| Value::String(s.clone())).collect())
            }
        }
    }
}

/// Validated classifier output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScopeOutcome {
    pub strategy_slug: String,
    pub category: String,
    pub time_window: TimeWindow,
    pub depth: Depth,
    pub tasks: Vec<String>,
    #[serde(default)]
    pub variables: HashMap<String, ScopeVar>,
}

/// Raw `set_scope` tool-call payload. Unknown fields are rejected rather
/// than coerced.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetScopeArgs {
    strategy_slug: String,
    category: String,
    time_window: TimeWindow,
    depth: Depth,
    tasks: Vec<String>,
    #[serde(default)]
    variables: HashMap<String, ScopeVar>,
}

/// Stable hash of the normalized request plus the catalog version.
pub fn fingerprint(user_request: &str, config_version: u64) -> String {
    let normalized = user_request
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(config_version.to_le_bytes());
    hex::encode(hasher.finalize())
}

fn catalog_prompt(snapshot: &CatalogSnapshot) -> String {
    let mut lines = Vec::new();
    for record in snapshot.active() {
        let meta = &record.strategy.meta;
        let vars = record
            .strategy
            .required_variables
            .iter()
            .map(|v| format!("{} ({})", v.name, v.description))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!(
            "- slug: {} | category: {} | time_window: {} | depth: {:?} | required variables: [{}] | {}",
            meta.slug,
            meta.category,
            meta.time_window.recency_filter(),
            meta.depth,
            vars,
            meta.description.as_deref().unwrap_or("")
        ));
    }
    lines.join("\n")
}

fn set_scope_schema(snapshot: &CatalogSnapshot) -> ToolSchema {
    let slugs: Vec<&str> = snapshot.active().map(|r| r.slug.as_str()).collect();
    ToolSchema {
        name: SET_SCOPE_TOOL.to_string(),
        description: "Record the research scope for this request.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "strategy_slug": {"type": "string", "enum": slugs},
                "category": {"type": "string"},
                "time_window": {"type": "string", "enum": ["day", "week", "month", "year"]},
                "depth": {"type": "string", "enum": ["brief", "overview", "deep", "comprehensive"]},
                "tasks": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1
                },
                "variables": {
                    "type": "object",
                    "additionalProperties": {
                        "oneOf": [
                            {"type": "string"},
                            {"type": "array", "items": {"type": "string"}}
                        ]
                    }
                }
            },
            "required": ["strategy_slug", "category", "time_window", "depth", "tasks"]
        }),
    }
}

/// Classify a request, consulting the fingerprint cache first.
pub async fn classify(
    llm: &PhaseLlm,
    snapshot: &CatalogSnapshot,
    cache: &ScopeCacheStorage,
    user_request: &str,
    nocache: bool,
) -> Result<ScopeOutcome> {
    let fingerprint = fingerprint(user_request, snapshot.version);

    if !nocache
        && let Ok(Some(cached)) = cache.get(&fingerprint)
        && let Ok(outcome) = serde_json::from_value::<ScopeOutcome>(cached)
    {
        // Cached classifications can outlive catalog edits within the TTL;
        // revalidate the slug before reuse.
        if snapshot.get(&outcome.strategy_slug).is_some() {
            debug!(%fingerprint, slug = %outcome.strategy_slug, "scope cache hit");
            return Ok(outcome);
        }
    }

    let system = format!(
        "You are the scope classifier of a research workflow service. Classify the \
         user's research request onto exactly one strategy from the catalog below, \
         split the request into 1-5 concrete research tasks, and fill every \
         required variable of the chosen strategy. Respond only through the \
         `set_scope` tool.\n\nStrategy catalog:\n{}",
        catalog_prompt(snapshot)
    );

    let request = CompletionRequest::new(vec![
        Message::system(system),
        Message::user(user_request.to_string()),
    ])
    .with_tools(vec![set_scope_schema(snapshot)])
    .with_tool_choice(ToolChoice::Required(SET_SCOPE_TOOL.to_string()));

    let response = llm
        .client
        .complete(llm.apply(request))
        .await
        .map_err(|e| WorkflowError::ScopeFailed(format!("classifier call failed: {e}")))?;

    let call = response
        .tool_calls
        .iter()
        .find(|c| c.name == SET_SCOPE_TOOL)
        .ok_or_else(|| {
            WorkflowError::ScopeFailed("classifier returned no set_scope tool call".into())
        })?;

    let args: SetScopeArgs = serde_json::from_value(call.arguments.clone())
        .map_err(|e| WorkflowError::ScopeFailed(format!("invalid set_scope payload: {e}")))?;

    let outcome = validate(args, snapshot)?;

    if let Ok(value) = serde_json::to_value(&outcome) {
        if let Err(error) = cache.put(&fingerprint, value) {
            debug!(%fingerprint, error = %error, "failed to persist scope classification");
        }
    }
    info!(slug = %outcome.strategy_slug, tasks = outcome.tasks.len(), "request classified");
    Ok(outcome)
}

fn validate(args: SetScopeArgs, snapshot: &CatalogSnapshot) -> Result<ScopeOutcome> {
    let record = snapshot.get(&args.strategy_slug).ok_or_else(|| {
        WorkflowError::ScopeFailed(format!(
            "classifier chose unknown strategy '{}'",
            args.strategy_slug
        ))
    })?;
    if !record.is_active {
        return Err(WorkflowError::ScopeFailed(format!(
            "classifier chose inactive strategy '{}'",
            args.strategy_slug
        )));
    }
    if args.tasks.is_empty() {
        return Err(WorkflowError::ScopeFailed("classifier returned no tasks".into()));
    }
    for required in &record.strategy.required_variables {
        if !args.variables.contains_key(&required.name) {
            return Err(WorkflowError::ScopeFailed(format!(
                "required variable '{}' missing from classification",
                required.name
            )));
        }
    }
    Ok(ScopeOutcome {
        strategy_slug: args.strategy_slug,
        category: args.category,
        time_window: args.time_window,
        depth: args.depth,
        tasks: args.tasks,
        variables: args.variables,
    })
}
