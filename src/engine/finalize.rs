//! Finalize phase: synthesize a cited markdown report from the evidence
//! pool, either in one shot or through a bounded tool-use loop.

use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::adapters::ToolResult;
use crate::engine::fill::runtime_plan;
use crate::engine::research::StepExecutor;
use crate::error::{Result, WorkflowError};
use crate::llm::{CompletionRequest, LlmClient, Message, PhaseLlm, ToolSchema};
use crate::models::{Evidence, State, StepPhase, Strategy};

const DIGEST_RECORDS: usize = 20;
const DIGEST_SNIPPET_CHARS: usize = 300;
const SECTION_FINGERPRINT_CHARS: usize = 200;
const SENTINEL_REFERENCE_CHARS: usize = 60;

/// Run the finalize phase: any `phase: finalize` plan steps first, then the
/// synthesizer, then section parsing and citation emission.
pub async fn run_finalize(
    executor: &mut StepExecutor<'_>,
    llm: &PhaseLlm,
    strategy: &Strategy,
    state: &mut State,
) -> Result<()> {
    let mut plan = runtime_plan(state)?;
    executor
        .run_steps(state, &mut plan, StepPhase::Finalize, &HashMap::new())
        .await?;

    let report = match &strategy.finalize {
        Some(spec) if spec.reactive => {
            reactive_report(executor, llm, strategy, state, spec.max_iterations()).await?
        }
        _ => single_shot_report(llm, strategy, state).await?,
    };

    let sections = split_sections(&report);
    let (sections, dropped) = dedupe_sections(sections);
    if dropped > 0 {
        warn!(dropped, "dropped duplicate report sections");
    }
    state.write.sections.extend(sections);
    let citations = emit_citations(state);
    state.write.citations.extend(citations);
    info!(
        sections = state.write.sections.len(),
        citations = state.write.citations.len(),
        "report synthesized"
    );
    Ok(())
}

/// Top-of-the-pool digest fed to the synthesizer prompt.
fn evidence_digest(evidence: &[Evidence]) -> String {
    evidence
        .iter()
        .take(DIGEST_RECORDS)
        .map(|e| {
            let snippet: String = e.snippet.chars().take(DIGEST_SNIPPET_CHARS).collect();
            let date = e
                .published_at
                .map(|d| d.to_string())
                .unwrap_or_else(|| "n.d.".into());
            if e.url.is_empty() {
                format!("- [{}] {} ({date}): {snippet}", e.tool, e.title)
            } else {
                format!("- {} ({date}) {}: {snippet}", e.publisher, e.url)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn writing_instructions(strategy: &Strategy) -> String {
    let mut out = String::from(
        "Write a research report in markdown. Start each section with a '## ' \
         heading. Cite sources inline by their full URL.",
    );
    if !strategy.render.sections.is_empty() {
        out.push_str(&format!(
            " Use exactly these sections, in order: {}.",
            strategy
                .render
                .sections
                .iter()
                .map(|s| format!("'## {s}'"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if let Some(spec) = &strategy.finalize {
        out.push_str("\n\n");
        out.push_str(&spec.instructions);
    }
    out
}

async fn single_shot_report(
    llm: &PhaseLlm,
    strategy: &Strategy,
    state: &State,
) -> Result<String> {
    let request = CompletionRequest::new(vec![
        Message::system(writing_instructions(strategy)),
        Message::user(format!(
            "Research request: {}\n\nEvidence:\n{}",
            state.scope.user_request,
            evidence_digest(&state.research.evidence)
        )),
    ]);

    let response = llm
        .client
        .complete(llm.apply(request))
        .await
        .map_err(|e| WorkflowError::Llm(format!("finalize call failed: {e}")))?;
    Ok(response.content.unwrap_or_default())
}

/// Schemas for every adapter method, plus the map from the flattened tool
/// name back to the `provider.method` dispatch target.
fn adapter_tools(executor: &StepExecutor<'_>) -> (Vec<ToolSchema>, HashMap<String, String>) {
    let mut schemas = Vec::new();
    let mut targets = HashMap::new();
    for provider in executor.registry.names() {
        let Some(adapter) = executor.registry.get(provider) else {
            continue;
        };
        for method in adapter.methods() {
            let name = format!("{provider}_{method}");
            targets.insert(name.clone(), format!("{provider}.{method}"));
            schemas.push(ToolSchema {
                name,
                description: format!("Invoke {method} on the {provider} provider."),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "prompt": {"type": "string"},
                        "url": {"type": "string"},
                        "urls": {"type": "array", "items": {"type": "string"}}
                    },
                    "additionalProperties": true
                }),
            });
        }
    }
    (schemas, targets)
}

/// Bounded ReAct loop: the model alternates between adapter calls and the
/// final report. Identical repeated calls are collapsed; tool calls count
/// against the strategy's LLM-query budget.
async fn reactive_report(
    executor: &mut StepExecutor<'_>,
    llm: &PhaseLlm,
    strategy: &Strategy,
    state: &mut State,
    max_iterations: usize,
) -> Result<String> {
    let (schemas, targets) = adapter_tools(executor);
    let mut messages = vec![
        Message::system(format!(
            "{} You may call the available tools to gather missing evidence \
             before writing. When the evidence suffices, reply with the final \
             report and no tool calls.",
            writing_instructions(strategy)
        )),
        Message::user(format!(
            "Research request: {}\n\nEvidence so far:\n{}",
            state.scope.user_request,
            evidence_digest(&state.research.evidence)
        )),
    ];

    let mut seen_calls: HashSet<String> = HashSet::new();
    let mut last_content = String::new();

    for iteration in 0..max_iterations {
        let request =
            CompletionRequest::new(messages.clone()).with_tools(schemas.clone());
        let response = llm
            .client
            .complete(llm.apply(request))
            .await
            .map_err(|e| WorkflowError::Llm(format!("finalize call failed: {e}")))?;

        if response.tool_calls.is_empty() {
            return Ok(response.content.unwrap_or_default());
        }
        if let Some(content) = &response.content {
            last_content = content.clone();
        }

        messages.push(Message::assistant_with_tool_calls(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in &response.tool_calls {
            let Some(target) = targets.get(&call.name) else {
                messages.push(Message::tool_result(
                    call.id.clone(),
                    format!("unknown tool '{}'", call.name),
                ));
                continue;
            };

            let signature = format!("{}:{}", call.name, call.arguments);
            if !seen_calls.insert(signature) {
                debug!(tool = %call.name, "collapsed repeated tool call");
                messages.push(Message::tool_result(
                    call.id.clone(),
                    "this exact call was already made; use its earlier result",
                ));
                continue;
            }

            if executor.llm_queries_used >= strategy.limits.max_llm_queries() {
                messages.push(Message::tool_result(
                    call.id.clone(),
                    "tool budget exhausted; write the report from the evidence you have",
                ));
                continue;
            }
            executor.llm_queries_used += 1;

            let summary = match executor
                .registry
                .invoke(target, &call.arguments, executor.deadline)
                .await
            {
                Ok(ToolResult::Evidence(mut records)) => {
                    executor
                        .store
                        .rescore(&mut records, state.scope.time_window);
                    let count = records.len();
                    executor
                        .store
                        .merge(&mut state.research.evidence, records.clone());
                    json!({
                        "evidence_count": count,
                        "records": records
                            .iter()
                            .map(|e| json!({"title": e.title, "url": e.url, "snippet": e.snippet}))
                            .collect::<Vec<_>>(),
                    })
                    .to_string()
                }
                Ok(ToolResult::Value(value)) => value.to_string(),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    state.write.errors.push(error.to_string());
                    format!("tool call failed: {error}")
                }
            };
            messages.push(Message::tool_result(call.id.clone(), summary));
        }
        debug!(iteration, "reactive finalize turn complete");
    }

    warn!(max_iterations, "reactive finalize hit its iteration cap");
    Ok(last_content)
}

/// Split a markdown report on `## ` headings. A report without headings is
/// one section. The parser accepts partial markdown without raising.
pub fn split_sections(report: &str) -> Vec<String> {
    let trimmed = report.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in trimmed.lines() {
        if line.starts_with("## ") && !current.trim().is_empty() {
            sections.push(current.trim().to_string());
            current = String::new();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }
    sections
}

/// Drop sections whose first 200 characters repeat an earlier section.
pub fn dedupe_sections(sections: Vec<String>) -> (Vec<String>, usize) {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    for section in sections {
        let fingerprint: String = section.chars().take(SECTION_FINGERPRINT_CHARS).collect();
        if seen.insert(fingerprint) {
            kept.push(section);
        } else {
            dropped += 1;
        }
    }
    (kept, dropped)
}

/// One citation per unique canonical URL referenced by a section. Sentinel
/// evidence is cited only when its text appears in the report.
fn emit_citations(state: &State) -> Vec<String> {
    let body = state.write.sections.join("\n");
    let mut seen = HashSet::new();
    let mut citations = Vec::new();

    for evidence in &state.research.evidence {
        let referenced = if evidence.is_sentinel() {
            let probe: String = evidence
                .snippet
                .trim()
                .chars()
                .take(SENTINEL_REFERENCE_CHARS)
                .collect();
            !probe.is_empty() && body.contains(&probe)
        } else {
            body.contains(&evidence.url)
        };
        if !referenced {
            continue;
        }
        let key = if evidence.url.is_empty() {
            format!("sentinel:{}", evidence.tool)
        } else {
            crate::evidence::canonicalize_url(&evidence.url)
        };
        if seen.insert(key) {
            citations.push(evidence.citation());
        }
    }
    citations
}
