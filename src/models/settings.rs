//! Global settings rows, a key → JSON value store for runtime tunables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSetting {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

impl GlobalSetting {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            updated_at: Utc::now(),
        }
    }
}
