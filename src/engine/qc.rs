//! QC phase: mechanical report checks plus an optional LLM grounding pass.
//!
//! QC annotates; it never rejects a result. The grounding check fails open:
//! any failure there records a warning and reports the result as grounded.

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::llm::{CompletionRequest, LlmClient, Message, PhaseLlm};
use crate::models::{State, Strategy};

#[derive(Debug, Deserialize)]
struct GroundingVerdict {
    grounded: bool,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    inconsistencies: Vec<String>,
}

/// Run all checks and annotate `state.write.warnings`/`errors`.
pub async fn run_qc(llm: Option<&PhaseLlm>, strategy: &Strategy, state: &mut State) {
    let mut warnings = mechanical_checks(strategy, state);

    if let Some(llm) = llm {
        let verdict = grounding_check(llm, state).await;
        if !verdict.grounded {
            warnings.push("grounding check: report may not be grounded in evidence".into());
        }
        warnings.extend(verdict.warnings.into_iter().map(|w| format!("grounding check: {w}")));
        warnings.extend(
            verdict
                .inconsistencies
                .into_iter()
                .map(|i| format!("grounding inconsistency: {i}")),
        );
    }

    if !warnings.is_empty() {
        debug!(count = warnings.len(), "qc raised warnings");
    }
    state.write.warnings.extend(warnings);
}

fn mechanical_checks(strategy: &Strategy, state: &mut State) -> Vec<String> {
    let mut warnings = Vec::new();

    // Required sections present.
    for required in &strategy.render.sections {
        let needle = required.to_lowercase();
        let found = state
            .write
            .sections
            .iter()
            .any(|s| s.to_lowercase().contains(&needle));
        if !found {
            warnings.push(format!("required section '{required}' is missing"));
        }
    }

    if state.write.sections.is_empty() && !state.research.evidence.is_empty() {
        warnings.push("report has no sections despite collected evidence".into());
    }

    // Citation quorum over non-sentinel sources.
    let cited_urls: HashSet<&str> = state
        .research
        .evidence
        .iter()
        .filter(|e| !e.is_sentinel() && !e.url.is_empty())
        .filter(|e| state.write.citations.iter().any(|c| c.contains(&e.url)))
        .map(|e| e.url.as_str())
        .collect();
    let min_citations = strategy.limits.min_citations();
    if cited_urls.len() < min_citations {
        warnings.push(format!(
            "only {} unique source citations, expected at least {min_citations}",
            cited_urls.len()
        ));
    }

    // Cited dates must fall inside the time window when present.
    let today = Utc::now().date_naive();
    let window_start = today - Duration::days(state.scope.time_window.days());
    for evidence in &state.research.evidence {
        let Some(date) = evidence.published_at else {
            continue;
        };
        let cited = state
            .write
            .citations
            .iter()
            .any(|c| !evidence.url.is_empty() && c.contains(&evidence.url));
        if cited && date < window_start {
            warnings.push(format!(
                "cited source {} is dated {date}, outside the {} window",
                evidence.url,
                state.scope.time_window.recency_filter()
            ));
        }
    }

    // Duplicate sections should already be gone; finding one here is an
    // error, not a warning.
    let mut fingerprints = HashSet::new();
    for section in &state.write.sections {
        let fingerprint: String = section.chars().take(200).collect();
        if !fingerprints.insert(fingerprint) {
            state
                .write
                .errors
                .push("duplicate section fingerprint survived finalize".into());
        }
    }

    warnings
}

async fn grounding_check(llm: &PhaseLlm, state: &State) -> GroundingVerdict {
    let fallback = |reason: String| GroundingVerdict {
        grounded: true,
        warnings: vec![format!("grounding check unavailable: {reason}")],
        inconsistencies: Vec::new(),
    };

    let payload = json!({
        "sections": state.write.sections,
        "citations": state.write.citations,
    });
    let request = CompletionRequest::new(vec![
        Message::system(
            "Check whether the report sections are grounded in the listed \
             citations. Respond with a JSON object: {\"grounded\": bool, \
             \"warnings\": [string], \"inconsistencies\": [string]}.",
        ),
        Message::user(payload.to_string()),
    ])
    .with_json_response();

    let response = match llm.client.complete(llm.apply(request)).await {
        Ok(response) => response,
        Err(error) => {
            warn!(error = %error, "grounding check call failed");
            return fallback(error.to_string());
        }
    };
    let Some(content) = response.content else {
        return fallback("empty response".into());
    };
    match serde_json::from_str::<GroundingVerdict>(&content) {
        Ok(verdict) => verdict,
        Err(error) => {
            warn!(error = %error, "grounding check returned unparseable JSON");
            fallback(format!("unparseable verdict: {error}"))
        }
    }
}
