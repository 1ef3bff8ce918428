//! Scope classification cache rows, keyed by request fingerprint.
//!
//! The 24h TTL is enforced on read; expired rows are deleted lazily.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::record::{RecordStore, record_store};

pub const SCOPE_CACHE_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeCacheEntry {
    pub result: Value,
    pub created_at: DateTime<Utc>,
}

record_store! {
    pub struct ScopeCacheStorage { record: ScopeCacheEntry, table: "scope_classifications" }
}

impl ScopeCacheStorage {
    pub fn put(&self, fingerprint: &str, result: Value) -> Result<()> {
        let entry = ScopeCacheEntry {
            result,
            created_at: Utc::now(),
        };
        self.write(fingerprint, &entry)
    }

    /// Read a cached classification; expired entries are removed and
    /// reported as misses.
    pub fn get(&self, fingerprint: &str) -> Result<Option<Value>> {
        let Some(entry) = self.read(fingerprint)? else {
            return Ok(None);
        };
        if Utc::now() - entry.created_at > Duration::hours(SCOPE_CACHE_TTL_HOURS) {
            self.remove_key(fingerprint)?;
            return Ok(None);
        }
        Ok(Some(entry.result))
    }
}
