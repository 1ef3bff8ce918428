//! Persistent strategy catalog rows, keyed by slug.

use anyhow::{Result, bail};
use chrono::Utc;

use crate::models::{Strategy, StrategyRecord};
use crate::storage::record::{RecordStore, record_store};

record_store! {
    pub struct StrategyStorage { record: StrategyRecord, table: "strategies" }
}

impl StrategyStorage {
    /// Create a new strategy; fails when the slug already exists.
    pub fn create(&self, strategy: &Strategy) -> Result<StrategyRecord> {
        let record = StrategyRecord::new(strategy.clone());
        if !self.insert_new(&record.slug, &record)? {
            bail!("strategy '{}' already exists", record.slug);
        }
        Ok(record)
    }

    pub fn get(&self, slug: &str) -> Result<Option<StrategyRecord>> {
        self.read(slug)
    }

    pub fn list(&self) -> Result<Vec<StrategyRecord>> {
        self.scan()
    }

    /// Replace an existing strategy's content; fails when absent.
    pub fn update(&self, slug: &str, strategy: &Strategy) -> Result<StrategyRecord> {
        let Some(mut record) = self.read(slug)? else {
            bail!("strategy '{slug}' not found");
        };
        record.strategy = strategy.clone();
        record.slug = strategy.meta.slug.clone();
        record.updated_at = Utc::now();
        if record.slug != slug {
            // Slug rename: move the row.
            self.remove_key(slug)?;
        }
        self.write(&record.slug, &record)?;
        Ok(record)
    }

    pub fn set_active(&self, slug: &str, is_active: bool) -> Result<StrategyRecord> {
        let Some(mut record) = self.read(slug)? else {
            bail!("strategy '{slug}' not found");
        };
        record.is_active = is_active;
        record.updated_at = Utc::now();
        self.write(slug, &record)?;
        Ok(record)
    }

    /// Remove a strategy; fails when absent.
    pub fn remove(&self, slug: &str) -> Result<()> {
        if !self.remove_key(slug)? {
            bail!("strategy '{slug}' not found");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::Database;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> (StrategyStorage, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        (StrategyStorage::new(db).unwrap(), temp_dir)
    }

    fn sample(slug: &str) -> Strategy {
        serde_yaml::from_str(&format!(
            r#"
meta: {{slug: {slug}, version: 1, category: news, time_window: day, depth: brief}}
"#
        ))
        .unwrap()
    }

    #[test]
    fn create_then_get_round_trips() {
        let (storage, _tmp) = setup();
        storage.create(&sample("news/brief")).unwrap();

        let record = storage.get("news/brief").unwrap().unwrap();
        assert_eq!(record.strategy, sample("news/brief"));
        assert!(record.is_active);
    }

    #[test]
    fn duplicate_create_fails() {
        let (storage, _tmp) = setup();
        storage.create(&sample("s")).unwrap();
        let err = storage.create(&sample("s")).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn update_missing_fails() {
        let (storage, _tmp) = setup();
        let err = storage.update("ghost", &sample("ghost")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn update_bumps_timestamp_and_content() {
        let (storage, _tmp) = setup();
        storage.create(&sample("s")).unwrap();

        let mut updated = sample("s");
        updated.meta.version = 2;
        let record = storage.update("s", &updated).unwrap();
        assert_eq!(record.strategy.meta.version, 2);
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn remove_missing_fails() {
        let (storage, _tmp) = setup();
        assert!(storage.remove("ghost").is_err());
        storage.create(&sample("s")).unwrap();
        storage.remove("s").unwrap();
        assert!(storage.get("s").unwrap().is_none());
    }
}
