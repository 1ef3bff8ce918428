//! Workflow state, composed across phases.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::models::Evidence;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Day,
    #[default]
    Week,
    Month,
    Year,
}

impl TimeWindow {
    /// Value passed to search providers as a recency filter.
    pub fn recency_filter(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 31,
            Self::Year => 366,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Brief,
    #[default]
    Overview,
    Deep,
    Comprehensive,
}

/// Workflow phases, strictly sequential.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Scope,
    Fill,
    Research,
    Finalize,
    Qc,
    Done,
}

impl Phase {
    pub fn next(&self) -> Option<Phase> {
        match self {
            Self::Scope => Some(Self::Fill),
            Self::Fill => Some(Self::Research),
            Self::Research => Some(Self::Finalize),
            Self::Finalize => Some(Self::Qc),
            Self::Qc => Some(Self::Done),
            Self::Done => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scope => "scope",
            Self::Fill => "fill",
            Self::Research => "research",
            Self::Finalize => "finalize",
            Self::Qc => "qc",
            Self::Done => "done",
        }
    }
}

/// Output of the scope phase.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScopeState {
    pub user_request: String,
    pub category: String,
    pub time_window: TimeWindow,
    pub depth: Depth,
    pub strategy_slug: String,
}

/// Accumulated research data. `evidence` is append-only between phases.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResearchState {
    pub tasks: Vec<String>,
    pub queries: HashMap<String, String>,
    pub evidence: Vec<Evidence>,
}

/// Writing-phase output plus the authoritative variable bag.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WriteState {
    pub sections: Vec<String>,
    pub citations: Vec<String>,
    pub limitations: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Open mapping used for templating; strategies freely add keys here.
    pub vars: HashMap<String, Value>,
}

/// Full workflow state. Owned exclusively by the executor during an
/// invocation; snapshots are taken at phase boundaries for checkpointing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// Task UUID for subscribed tasks, freshly minted for manual runs.
    pub thread_id: String,
    pub phase: Phase,
    pub scope: ScopeState,
    pub research: ResearchState,
    pub write: WriteState,
}

impl State {
    pub fn new(thread_id: impl Into<String>, user_request: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            phase: Phase::Scope,
            scope: ScopeState {
                user_request: user_request.into(),
                ..Default::default()
            },
            research: ResearchState::default(),
            write: WriteState::default(),
        }
    }

    /// Variable context visible to templates: the vars bag plus the scope
    /// fields and task list under fixed names.
    pub fn template_context(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.write.vars {
            map.insert(k.clone(), v.clone());
        }
        map.insert(
            "user_request".into(),
            Value::String(self.scope.user_request.clone()),
        );
        map.insert("category".into(), Value::String(self.scope.category.clone()));
        map.insert(
            "time_window".into(),
            Value::String(self.scope.time_window.recency_filter().to_string()),
        );
        map.insert(
            "tasks".into(),
            Value::Array(
                self.research
                    .tasks
                    .iter()
                    .map(|t| Value::String(t.clone()))
                    .collect(),
            ),
        );
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_sequence_is_fixed() {
        let mut phase = Phase::Scope;
        let mut order = vec![phase];
        while let Some(next) = phase.next() {
            order.push(next);
            phase = next;
        }
        assert_eq!(
            order,
            vec![
                Phase::Scope,
                Phase::Fill,
                Phase::Research,
                Phase::Finalize,
                Phase::Qc,
                Phase::Done
            ]
        );
    }

    #[test]
    fn template_context_exposes_scope_and_vars() {
        let mut state = State::new("t1", "what changed in EU AI policy");
        state.scope.category = "news".into();
        state.research.tasks.push("scan coverage".into());
        state
            .write
            .vars
            .insert("topic".into(), Value::String("EU AI".into()));

        let ctx = state.template_context();
        assert_eq!(ctx["topic"], "EU AI");
        assert_eq!(ctx["category"], "news");
        assert_eq!(ctx["tasks"][0], "scan coverage");
    }

    #[test]
    fn enums_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&TimeWindow::Week).unwrap(),
            "\"week\""
        );
        assert_eq!(serde_json::to_string(&Depth::Deep).unwrap(), "\"deep\"");
        assert_eq!(serde_json::to_string(&Phase::Qc).unwrap(), "\"qc\"");
    }
}
