//! Evidence record produced by tool adapters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool names whose evidence carries no web URL (direct model answers).
///
/// Sentinel evidence is excluded from diversity counts and from the citation
/// quorum, but may still be cited when its text is referenced by a section.
pub const SENTINEL_TOOLS: &[&str] = &["llm_analysis_result", "exa_answer"];

/// A normalized record of a retrieved source.
///
/// This is a closed record: adapters map their wire formats into exactly
/// these fields and nothing else rides along except the opaque `raw` payload,
/// which is dropped at the end of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    /// Canonical URL. Empty only for sentinel tools.
    pub url: String,
    pub title: String,
    /// At most 500 characters after normalization.
    pub snippet: String,
    pub publisher: String,
    pub published_at: Option<NaiveDate>,
    /// Name of the adapter (or sentinel) that produced the record.
    pub tool: String,
    pub score: f64,
    /// Tool-specific payload, never persisted beyond the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl Evidence {
    pub fn is_sentinel(&self) -> bool {
        SENTINEL_TOOLS.contains(&self.tool.as_str())
    }

    /// Citation line: `publisher (date): url`. Sentinel records cite their
    /// tool name in place of a URL.
    pub fn citation(&self) -> String {
        let date = self
            .published_at
            .map(|d| d.to_string())
            .unwrap_or_else(|| "n.d.".to_string());
        let target = if self.url.is_empty() {
            self.tool.clone()
        } else {
            self.url.clone()
        };
        format!("{} ({}): {}", self.publisher, date, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_detection() {
        let mut e = Evidence {
            url: String::new(),
            title: "answer".into(),
            snippet: "text".into(),
            publisher: "model".into(),
            published_at: None,
            tool: "llm_analysis_result".into(),
            score: 0.0,
            raw: None,
        };
        assert!(e.is_sentinel());
        e.tool = "exa".into();
        assert!(!e.is_sentinel());
    }

    #[test]
    fn citation_formats() {
        let e = Evidence {
            url: "https://example.com/a".into(),
            title: "t".into(),
            snippet: "s".into(),
            publisher: "Example".into(),
            published_at: NaiveDate::from_ymd_opt(2026, 6, 1),
            tool: "exa".into(),
            score: 1.0,
            raw: None,
        };
        assert_eq!(e.citation(), "Example (2026-06-01): https://example.com/a");
    }

    #[test]
    fn citation_without_date_or_url() {
        let e = Evidence {
            url: String::new(),
            title: "t".into(),
            snippet: "s".into(),
            publisher: "model".into(),
            published_at: None,
            tool: "llm_analysis_result".into(),
            score: 0.0,
            raw: None,
        };
        assert_eq!(e.citation(), "model (n.d.): llm_analysis_result");
    }
}
