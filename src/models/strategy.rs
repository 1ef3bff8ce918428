//! Declarative strategy blueprint: metadata, query templates, tool chain,
//! limits and render configuration. The YAML surface of this type is the
//! persisted JSONB equivalent, bit-exact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::models::state::{Depth, TimeWindow};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyMeta {
    pub slug: String,
    pub version: u32,
    pub category: String,
    pub time_window: TimeWindow,
    pub depth: Depth,
    /// Selection priority; highest active wins, ties break lexicographically
    /// by slug.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One step of a strategy's tool chain.
///
/// Two shapes are accepted: the legacy built-in form `{name, params}` and the
/// extended form `{use: "provider.method", inputs, ...}`. The extended shape
/// is tried first since it is the only one carrying `use`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Step {
    Extended(ExtendedStep),
    Legacy(LegacyStep),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyStep {
    /// Built-in step name, e.g. `sonar_overview`, `exa_search_semantic`.
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtendedStep {
    /// Adapter dispatch target, `"<provider>.<method>"`.
    #[serde(rename = "use")]
    pub use_: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Input keys the fill phase asks the LLM to populate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub llm_fill: Vec<String>,
    /// Variable naming a sequence; the step runs once per element, bound to
    /// `_item`. Combined with `save_as`, results accumulate into a sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<String>,
    /// Boolean guard expression; false skips the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Variable name the step result is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,
    #[serde(default)]
    pub phase: StepPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Step {
    /// Phase this step belongs to.
    pub fn phase(&self) -> StepPhase {
        match self {
            Step::Extended(step) => step.phase,
            Step::Legacy(_) => StepPhase::Research,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    #[default]
    Research,
    Finalize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Limits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_llm_queries: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_citations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_refine_threshold: Option<usize>,
}

impl Limits {
    pub fn max_results(&self) -> usize {
        self.max_results.unwrap_or(20)
    }

    pub fn max_llm_queries(&self) -> usize {
        self.max_llm_queries.unwrap_or(10)
    }

    pub fn min_citations(&self) -> usize {
        self.min_citations.unwrap_or(2)
    }
}

/// Research-phase iteration mode.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(try_from = "FanOutRepr")]
pub enum FanOut {
    /// Single iteration over `vars.topic`.
    #[default]
    None,
    /// One iteration per scope task.
    Task,
    /// One iteration per element of `vars[var]`, bound to `vars[map_to]`
    /// (default `topic`), truncated to `limit`.
    Var {
        var: String,
        map_to: Option<String>,
        limit: Option<usize>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FanOutRepr {
    Mode(String),
    Var {
        mode: String,
        var: String,
        #[serde(default)]
        map_to: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
}

impl TryFrom<FanOutRepr> for FanOut {
    type Error = String;

    fn try_from(repr: FanOutRepr) -> Result<Self, Self::Error> {
        match repr {
            FanOutRepr::Mode(mode) => match mode.as_str() {
                "none" => Ok(FanOut::None),
                "task" => Ok(FanOut::Task),
                other => Err(format!("unknown fan_out mode '{other}'")),
            },
            FanOutRepr::Var {
                mode,
                var,
                map_to,
                limit,
            } => {
                if mode != "var" {
                    return Err(format!("unknown fan_out mode '{mode}'"));
                }
                Ok(FanOut::Var { var, map_to, limit })
            }
        }
    }
}

impl Serialize for FanOut {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            FanOut::None => serializer.serialize_str("none"),
            FanOut::Task => serializer.serialize_str("task"),
            FanOut::Var { var, map_to, limit } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("mode", "var")?;
                map.serialize_entry("var", var)?;
                if let Some(map_to) = map_to {
                    map.serialize_entry("map_to", map_to)?;
                }
                if let Some(limit) = limit {
                    map.serialize_entry("limit", limit)?;
                }
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequiredVariable {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Render {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_style: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalizeSpec {
    pub reactive: bool,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

impl FinalizeSpec {
    pub fn max_iterations(&self) -> usize {
        self.max_iterations.unwrap_or(4)
    }
}

/// Per-phase LLM parameter overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmOverride {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Strategy {
    pub meta: StrategyMeta,
    #[serde(default)]
    pub queries: HashMap<String, String>,
    #[serde(default)]
    pub tool_chain: Vec<Step>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub fan_out: FanOut,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_variables: Vec<RequiredVariable>,
    #[serde(default)]
    pub render: Render,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize: Option<FinalizeSpec>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub llm: HashMap<String, LlmOverride>,
}

impl Strategy {
    pub fn slug(&self) -> &str {
        &self.meta.slug
    }

    /// Structural validation applied on create/update and bootstrap.
    pub fn validate(&self) -> Result<(), String> {
        if self.meta.slug.is_empty() {
            return Err("strategy slug must not be empty".into());
        }
        for (idx, step) in self.tool_chain.iter().enumerate() {
            match step {
                Step::Extended(step) => {
                    let mut parts = step.use_.splitn(2, '.');
                    let provider = parts.next().unwrap_or_default();
                    let method = parts.next().unwrap_or_default();
                    if provider.is_empty() || method.is_empty() {
                        return Err(format!(
                            "step {idx}: 'use' must be '<provider>.<method>', got '{}'",
                            step.use_
                        ));
                    }
                    for key in &step.llm_fill {
                        if key.is_empty() {
                            return Err(format!("step {idx}: empty llm_fill key"));
                        }
                    }
                }
                Step::Legacy(step) => {
                    if step.name.is_empty() {
                        return Err(format!("step {idx}: legacy step name must not be empty"));
                    }
                }
            }
        }
        if let FanOut::Var { var, .. } = &self.fan_out
            && var.is_empty()
        {
            return Err("fan_out.var must not be empty".into());
        }
        Ok(())
    }
}

/// Persisted strategy row: the YAML content plus catalog bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: String,
    pub slug: String,
    pub strategy: Strategy,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StrategyRecord {
    pub fn new(strategy: Strategy) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            slug: strategy.meta.slug.clone(),
            strategy,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
meta:
  slug: news/daily-brief
  version: 2
  category: news
  time_window: day
  depth: brief
  priority: 10
  description: Daily news briefing
queries:
  primary: "latest developments on {{topic}}"
tool_chain:
  - name: sonar_overview
    params:
      query: "{{queries.primary}}"
  - use: exa.search
    inputs:
      query: "{{topic}} analysis"
      num_results: 5
    llm_fill: [query]
    when: "depth == 'deep'"
    save_as: semantic_hits
  - use: llm_analyzer.call
    inputs:
      prompt: "Summarize: {{semantic_hits | shortlist:3}}"
    phase: finalize
limits:
  max_results: 12
  max_llm_queries: 6
fan_out: task
required_variables:
  - name: topic
    description: Main research topic
render:
  sections: ["Overview", "Key Developments"]
  citation_style: inline
finalize:
  reactive: false
  instructions: "Write a crisp daily brief."
llm:
  finalize:
    model: sonar-pro
    temperature: 0.2
"#;

    #[test]
    fn parses_full_yaml() {
        let strategy: Strategy = serde_yaml::from_str(SAMPLE_YAML).unwrap();
        assert_eq!(strategy.meta.slug, "news/daily-brief");
        assert_eq!(strategy.tool_chain.len(), 3);
        assert_eq!(strategy.fan_out, FanOut::Task);
        assert_eq!(strategy.limits.max_results(), 12);
        assert_eq!(strategy.render.sections.len(), 2);
        assert!(strategy.validate().is_ok());
    }

    #[test]
    fn step_shapes_discriminate() {
        let strategy: Strategy = serde_yaml::from_str(SAMPLE_YAML).unwrap();
        match &strategy.tool_chain[0] {
            Step::Legacy(step) => assert_eq!(step.name, "sonar_overview"),
            other => panic!("expected legacy step, got {other:?}"),
        }
        match &strategy.tool_chain[1] {
            Step::Extended(step) => {
                assert_eq!(step.use_, "exa.search");
                assert_eq!(step.llm_fill, vec!["query"]);
                assert_eq!(step.save_as.as_deref(), Some("semantic_hits"));
                assert_eq!(step.phase, StepPhase::Research);
            }
            other => panic!("expected extended step, got {other:?}"),
        }
        assert_eq!(strategy.tool_chain[2].phase(), StepPhase::Finalize);
    }

    #[test]
    fn fan_out_var_form() {
        let yaml = r#"
mode: var
var: companies
map_to: topic
limit: 5
"#;
        let fan_out: FanOut = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            fan_out,
            FanOut::Var {
                var: "companies".into(),
                map_to: Some("topic".into()),
                limit: Some(5),
            }
        );
    }

    #[test]
    fn fan_out_rejects_unknown_mode() {
        let result: Result<FanOut, _> = serde_yaml::from_str("\"parallel\"");
        assert!(result.is_err());
    }

    #[test]
    fn json_round_trip_is_structural_identity() {
        let strategy: Strategy = serde_yaml::from_str(SAMPLE_YAML).unwrap();
        let json = serde_json::to_string(&strategy).unwrap();
        let back: Strategy = serde_json::from_str(&json).unwrap();
        assert_eq!(strategy, back);
    }

    #[test]
    fn validate_rejects_bad_use_target() {
        let mut strategy: Strategy = serde_yaml::from_str(SAMPLE_YAML).unwrap();
        if let Step::Extended(step) = &mut strategy.tool_chain[1] {
            step.use_ = "exa".into();
        }
        assert!(strategy.validate().is_err());
    }
}
