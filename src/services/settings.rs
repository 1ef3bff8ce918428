//! Typed accessors over the global settings store.

use anyhow::Result;
use serde_json::Value;

use crate::evidence::ScoreWeights;
use crate::models::GlobalSetting;
use crate::storage::SettingsStorage;

pub const KEY_MIN_REFINE_THRESHOLD: &str = "research.min_refine_threshold";
pub const KEY_QC_LLM_ENABLED: &str = "qc.llm_enabled";
pub const KEY_SCORE_WEIGHTS: &str = "evidence.score_weights";

const DEFAULT_MIN_REFINE_THRESHOLD: usize = 3;

#[derive(Clone)]
pub struct SettingsService {
    storage: SettingsStorage,
}

impl SettingsService {
    pub fn new(storage: SettingsStorage) -> Self {
        Self { storage }
    }

    pub fn get(&self, key: &str) -> Result<Option<GlobalSetting>> {
        self.storage.get(key)
    }

    pub fn put(&self, key: &str, value: Value) -> Result<GlobalSetting> {
        self.storage.put(key, value)
    }

    pub fn list(&self) -> Result<Vec<GlobalSetting>> {
        self.storage.list()
    }

    /// Evidence floor below which the next search step's query is refined.
    /// Strategy limits override this global value.
    pub fn min_refine_threshold(&self) -> usize {
        self.value(KEY_MIN_REFINE_THRESHOLD)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MIN_REFINE_THRESHOLD)
    }

    pub fn qc_llm_enabled(&self) -> bool {
        self.value(KEY_QC_LLM_ENABLED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Scoring weights, overridable for A/B comparison.
    pub fn score_weights(&self) -> ScoreWeights {
        let defaults = ScoreWeights::default();
        let Some(value) = self.value(KEY_SCORE_WEIGHTS) else {
            return defaults;
        };
        ScoreWeights {
            base: value["base"].as_f64().unwrap_or(defaults.base),
            domain_boost: value["domain_boost"].as_f64().unwrap_or(defaults.domain_boost),
            recency_weight: value["recency_weight"]
                .as_f64()
                .unwrap_or(defaults.recency_weight),
            snippet_bonus: value["snippet_bonus"]
                .as_f64()
                .unwrap_or(defaults.snippet_bonus),
        }
    }

    fn value(&self, key: &str) -> Option<Value> {
        self.storage.get(key).ok().flatten().map(|s| s.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::Database;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> (SettingsService, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        (
            SettingsService::new(SettingsStorage::new(db).unwrap()),
            temp_dir,
        )
    }

    #[test]
    fn defaults_apply_when_unset() {
        let (service, _tmp) = setup();
        assert_eq!(service.min_refine_threshold(), 3);
        assert!(!service.qc_llm_enabled());
        assert_eq!(service.score_weights().base, ScoreWeights::default().base);
    }

    #[test]
    fn overrides_are_read_back() {
        let (service, _tmp) = setup();
        service
            .put(KEY_MIN_REFINE_THRESHOLD, serde_json::json!(5))
            .unwrap();
        service.put(KEY_QC_LLM_ENABLED, serde_json::json!(true)).unwrap();
        service
            .put(KEY_SCORE_WEIGHTS, serde_json::json!({"domain_boost": 4.0}))
            .unwrap();

        assert_eq!(service.min_refine_threshold(), 5);
        assert!(service.qc_llm_enabled());
        let weights = service.score_weights();
        assert_eq!(weights.domain_boost, 4.0);
        assert_eq!(weights.base, ScoreWeights::default().base);
    }
}
