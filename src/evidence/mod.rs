//! Evidence pipeline: normalization, URL canonicalization, deduplication,
//! scoring and budget trimming.
//!
//! Merging is commutative modulo the fixed sort order, which makes evidence
//! accumulation idempotent under checkpoint replay.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::models::{Evidence, TimeWindow};

const MAX_SNIPPET_CHARS: usize = 500;

/// Query parameters stripped during canonicalization.
const TRACKING_PARAMS: &[&str] = &["ref", "fbclid", "gclid"];

/// Injectable scoring weights, so alternative weightings can be compared
/// without touching the pipeline.
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub base: f64,
    pub domain_boost: f64,
    pub recency_weight: f64,
    pub snippet_bonus: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            base: 1.0,
            domain_boost: 2.0,
            recency_weight: 1.5,
            snippet_bonus: 0.5,
        }
    }
}

fn default_authority_domains() -> Vec<String> {
    [
        "reuters.com",
        "apnews.com",
        "bloomberg.com",
        "ft.com",
        "wsj.com",
        "economist.com",
        "nature.com",
        "science.org",
        "arxiv.org",
    ]
    .iter()
    .map(|d| d.to_string())
    .collect()
}

pub struct EvidenceStore {
    weights: ScoreWeights,
    authority_domains: Vec<String>,
}

impl Default for EvidenceStore {
    fn default() -> Self {
        Self::new(ScoreWeights::default(), default_authority_domains())
    }
}

impl EvidenceStore {
    pub fn new(weights: ScoreWeights, authority_domains: Vec<String>) -> Self {
        Self {
            weights,
            authority_domains,
        }
    }

    /// Custom weights over the default authority-domain list.
    pub fn with_weights(weights: ScoreWeights) -> Self {
        Self::new(weights, default_authority_domains())
    }

    /// Build an `Evidence` from a raw adapter record.
    ///
    /// Returns `None` when the record has no URL and `tool` is not a
    /// sentinel; everything else is normalized: snippet capped at 500
    /// characters, date parsed to a calendar date or dropped.
    pub fn normalize(&self, raw: &Value, tool: &str) -> Option<Evidence> {
        let url = raw
            .get("url")
            .and_then(Value::as_str)
            .map(canonicalize_url)
            .unwrap_or_default();
        let sentinel = crate::models::SENTINEL_TOOLS.contains(&tool);
        if url.is_empty() && !sentinel {
            return None;
        }

        let snippet = raw
            .get("snippet")
            .or_else(|| raw.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let publisher = raw
            .get("publisher")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| host_of(&url))
            .unwrap_or_else(|| tool.to_string());

        Some(Evidence {
            url,
            title: raw
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            snippet: truncate_chars(snippet, MAX_SNIPPET_CHARS),
            publisher,
            published_at: raw
                .get("published_at")
                .or_else(|| raw.get("published_date"))
                .and_then(Value::as_str)
                .and_then(parse_date),
            tool: tool.to_string(),
            score: 0.0,
            raw: Some(raw.clone()),
        })
    }

    /// Merge `incoming` into `existing`, deduplicating by canonical URL.
    ///
    /// The first occurrence keeps its metadata; later duplicates contribute
    /// only the maximum score and the longest non-empty snippet.
    pub fn merge(&self, existing: &mut Vec<Evidence>, incoming: Vec<Evidence>) {
        for record in incoming {
            let key = dedupe_key(&record);
            match existing.iter_mut().find(|e| dedupe_key(e) == key) {
                Some(found) => {
                    if record.score > found.score {
                        found.score = record.score;
                    }
                    if record.snippet.chars().count() > found.snippet.chars().count() {
                        found.snippet = record.snippet;
                    }
                }
                None => existing.push(record),
            }
        }
    }

    /// Score a record: authority-domain boost, recency decay within the
    /// strategy's time window, and a presence-of-snippet bonus.
    ///
    /// Monotone in each component: an on-list, more recent source never
    /// scores below an off-list, older one with the same snippet.
    pub fn score(&self, evidence: &Evidence, window: TimeWindow, today: NaiveDate) -> f64 {
        let mut score = self.weights.base;
        if let Some(host) = host_of(&evidence.url)
            && self
                .authority_domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{d}")))
        {
            score += self.weights.domain_boost;
        }
        if let Some(date) = evidence.published_at {
            let age = (today - date).num_days().max(0) as f64;
            let decay = (1.0 - age / window.days() as f64).max(0.0);
            score += self.weights.recency_weight * decay;
        }
        if !evidence.snippet.is_empty() {
            score += self.weights.snippet_bonus;
        }
        score
    }

    /// Recompute scores in place, keeping any higher adapter-provided score.
    pub fn rescore(&self, evidence: &mut [Evidence], window: TimeWindow) {
        let today = Utc::now().date_naive();
        for record in evidence.iter_mut() {
            record.score = record.score.max(self.score(record, window, today));
        }
    }

    /// Sort deterministically and trim to `max_results`.
    ///
    /// Order: score descending, recency descending with undated records
    /// last, explicit sources before sentinel records; the sort is stable so
    /// equal records keep arrival order. Sentinel records cut by the budget
    /// are retained so citations into them always resolve.
    pub fn filter(&self, mut evidence: Vec<Evidence>, max_results: usize) -> Vec<Evidence> {
        evidence.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| match (b.published_at, a.published_at) {
                    (Some(db), Some(da)) => db.cmp(&da),
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.is_sentinel().cmp(&b.is_sentinel()))
        });

        if evidence.len() <= max_results {
            return evidence;
        }
        let overflow = evidence.split_off(max_results);
        evidence.extend(overflow.into_iter().filter(Evidence::is_sentinel));
        evidence
    }
}

/// Canonical form of a URL for deduplication.
///
/// Lowercases scheme and host, drops default ports, the fragment, `utm_*`
/// and other tracking query keys, and the trailing slash of a non-root path.
/// Unparseable input is returned trimmed but otherwise untouched.
pub fn canonicalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    url.to_string()
}

fn dedupe_key(evidence: &Evidence) -> String {
    if !evidence.url.is_empty() {
        return canonicalize_url(&evidence.url);
    }
    // Sentinel records carry no URL; key them by tool plus a content
    // fingerprint so replayed merges stay idempotent.
    let mut hasher = Sha256::new();
    hasher.update(evidence.tool.as_bytes());
    hasher.update(truncate_chars(&evidence.snippet, 200).as_bytes());
    format!("sentinel:{}", hex::encode(&hasher.finalize()[..8]))
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(url: &str, score: f64, snippet: &str) -> Evidence {
        Evidence {
            url: url.to_string(),
            title: "t".into(),
            snippet: snippet.to_string(),
            publisher: "p".into(),
            published_at: None,
            tool: "exa".into(),
            score,
            raw: None,
        }
    }

    #[test]
    fn canonicalize_strips_tracking_and_fragment() {
        assert_eq!(
            canonicalize_url("HTTPS://Example.COM:443/News/?utm_source=x&id=2&ref=tw#top"),
            "https://example.com/News?id=2"
        );
    }

    #[test]
    fn canonicalize_keeps_root_slash() {
        assert_eq!(canonicalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn canonicalize_trims_trailing_slash() {
        assert_eq!(
            canonicalize_url("https://example.com/a/b/"),
            "https://example.com/a/b"
        );
    }

    #[test]
    fn canonicalize_passes_through_garbage() {
        assert_eq!(canonicalize_url("  not a url "), "not a url");
    }

    #[test]
    fn normalize_requires_url_unless_sentinel() {
        let store = EvidenceStore::default();
        let raw = json!({"title": "x", "snippet": "y"});
        assert!(store.normalize(&raw, "exa").is_none());
        assert!(store.normalize(&raw, "llm_analysis_result").is_some());
    }

    #[test]
    fn normalize_caps_snippet_and_parses_dates() {
        let store = EvidenceStore::default();
        let long = "a".repeat(900);
        let raw = json!({
            "url": "https://example.com/a",
            "title": "x",
            "snippet": long,
            "published_at": "2026-07-30",
        });
        let evidence = store.normalize(&raw, "exa").unwrap();
        assert_eq!(evidence.snippet.chars().count(), 500);
        assert_eq!(
            evidence.published_at,
            NaiveDate::from_ymd_opt(2026, 7, 30)
        );
        assert_eq!(evidence.publisher, "example.com");
    }

    #[test]
    fn normalize_accepts_rfc3339_dates() {
        let store = EvidenceStore::default();
        let raw = json!({
            "url": "https://example.com/a",
            "published_date": "2026-07-30T08:00:00Z",
        });
        let evidence = store.normalize(&raw, "exa").unwrap();
        assert_eq!(
            evidence.published_at,
            NaiveDate::from_ymd_opt(2026, 7, 30)
        );
    }

    #[test]
    fn merge_dedupes_by_canonical_url() {
        let store = EvidenceStore::default();
        let mut all = Vec::new();
        store.merge(
            &mut all,
            vec![record("https://example.com/a/", 1.0, "short")],
        );
        store.merge(
            &mut all,
            vec![record("https://EXAMPLE.com/a?utm_source=x", 3.0, "a longer snippet")],
        );
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].score, 3.0);
        assert_eq!(all[0].snippet, "a longer snippet");
        // First occurrence keeps its metadata.
        assert_eq!(all[0].url, "https://example.com/a/");
    }

    #[test]
    fn merge_is_commutative_modulo_sort() {
        let store = EvidenceStore::default();
        let a = record("https://example.com/a", 2.0, "aa");
        let b = record("https://example.com/b", 1.0, "bb");
        let c = record("https://example.com/a/", 3.0, "aaa");

        let mut left = Vec::new();
        store.merge(&mut left, vec![a.clone(), b.clone()]);
        store.merge(&mut left, vec![c.clone()]);

        let mut right = Vec::new();
        store.merge(&mut right, vec![c, b]);
        store.merge(&mut right, vec![a]);

        let left = store.filter(left, 10);
        let right = store.filter(right, 10);
        let urls = |list: &[Evidence]| {
            list.iter()
                .map(|e| canonicalize_url(&e.url))
                .collect::<Vec<_>>()
        };
        assert_eq!(urls(&left), urls(&right));
        assert_eq!(left.iter().map(|e| e.score).collect::<Vec<_>>(), vec![3.0, 1.0]);
    }

    #[test]
    fn zero_record_merge_is_noop() {
        let store = EvidenceStore::default();
        let mut all = vec![record("https://example.com/a", 1.0, "s")];
        store.merge(&mut all, vec![]);
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn score_is_monotone_in_recency_and_authority() {
        let store = EvidenceStore::default();
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();

        let mut on_list = record("https://www.reuters.com/x", 0.0, "s");
        on_list.published_at = NaiveDate::from_ymd_opt(2026, 7, 31);
        let mut off_list = record("https://blog.example.org/x", 0.0, "s");
        off_list.published_at = NaiveDate::from_ymd_opt(2026, 7, 25);

        let hi = store.score(&on_list, TimeWindow::Week, today);
        let lo = store.score(&off_list, TimeWindow::Week, today);
        assert!(hi > lo, "{hi} should beat {lo}");
    }

    #[test]
    fn filter_sorts_and_trims_deterministically() {
        let store = EvidenceStore::default();
        let mut dated = record("https://example.com/new", 2.0, "s");
        dated.published_at = NaiveDate::from_ymd_opt(2026, 7, 30);
        let undated = record("https://example.com/old", 2.0, "s");
        let low = record("https://example.com/low", 0.5, "s");

        let out = store.filter(vec![low, undated.clone(), dated.clone()], 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].url, dated.url);
        assert_eq!(out[1].url, undated.url);
    }

    #[test]
    fn filter_retains_cut_sentinels() {
        let store = EvidenceStore::default();
        let mut sentinel = record("", 0.1, "model answer");
        sentinel.tool = "llm_analysis_result".into();
        let a = record("https://example.com/a", 5.0, "s");
        let b = record("https://example.com/b", 4.0, "s");

        let out = store.filter(vec![sentinel.clone(), a, b], 2);
        assert_eq!(out.len(), 3);
        assert!(out.iter().any(|e| e.is_sentinel()));
    }
}
