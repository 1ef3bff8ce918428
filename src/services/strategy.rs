//! Strategy catalog: CRUD over the persistent store with an in-process
//! snapshot cache.
//!
//! Readers take an immutable `Arc<CatalogSnapshot>`; every mutating
//! operation rebuilds the snapshot from storage and swaps the reference, so
//! a read is never older than the last completed write observed in this
//! process. On an empty store the catalog bootstraps once from a directory
//! of YAML strategy files.

use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::models::{Strategy, StrategyRecord};
use crate::storage::{RecordStore, StrategyStorage};

/// Immutable catalog view resolved at the start of a phase.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub version: u64,
    records: Vec<StrategyRecord>,
}

impl CatalogSnapshot {
    pub fn get(&self, slug: &str) -> Option<&StrategyRecord> {
        self.records.iter().find(|r| r.slug == slug)
    }

    pub fn active(&self) -> impl Iterator<Item = &StrategyRecord> {
        self.records.iter().filter(|r| r.is_active)
    }

    /// Highest-priority active slug for the classification triple; ties
    /// break lexicographically by slug.
    pub fn select(
        &self,
        category: &str,
        time_window: crate::models::TimeWindow,
        depth: crate::models::Depth,
    ) -> Option<&str> {
        let mut candidates: Vec<&StrategyRecord> = self
            .active()
            .filter(|r| {
                r.strategy.meta.category == category
                    && r.strategy.meta.time_window == time_window
                    && r.strategy.meta.depth == depth
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.strategy
                .meta
                .priority
                .cmp(&a.strategy.meta.priority)
                .then_with(|| a.slug.cmp(&b.slug))
        });
        candidates.first().map(|r| r.slug.as_str())
    }
}

pub struct StrategyCatalog {
    storage: StrategyStorage,
    cache: RwLock<Arc<CatalogSnapshot>>,
    version: AtomicU64,
    /// Observable count of cache rebuilds, for telemetry and tests.
    invalidations: AtomicU64,
}

impl StrategyCatalog {
    /// Open the catalog; when the store is empty, seed it from the YAML
    /// files in `strategies_dir` (done once, at construction).
    pub fn open(storage: StrategyStorage, strategies_dir: &Path) -> Result<Self> {
        let catalog = Self {
            storage,
            cache: RwLock::new(Arc::new(CatalogSnapshot::default())),
            version: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        };
        if catalog.storage.is_empty()? {
            catalog.bootstrap(strategies_dir)?;
        }
        catalog.rebuild()?;
        // Count invalidations from a clean slate: the initial build is not
        // a cache invalidation event.
        catalog.invalidations.store(0, Ordering::SeqCst);
        Ok(catalog)
    }

    fn bootstrap(&self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no bootstrap strategy directory");
            return Ok(());
        }
        let mut loaded = 0usize;
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                continue;
            }
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let strategy: Strategy = match serde_yaml::from_str(&contents) {
                Ok(strategy) => strategy,
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping unparseable strategy file");
                    continue;
                }
            };
            if let Err(reason) = strategy.validate() {
                warn!(path = %path.display(), reason, "skipping invalid strategy file");
                continue;
            }
            self.storage.create(&strategy)?;
            loaded += 1;
        }
        info!(loaded, dir = %dir.display(), "bootstrapped strategy catalog");
        Ok(())
    }

    fn rebuild(&self) -> Result<()> {
        let records = self.storage.list()?;
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(CatalogSnapshot { version, records });
        *self
            .cache
            .write()
            .map_err(|_| anyhow!("catalog cache lock poisoned"))? = snapshot;
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.cache
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Monotonic catalog version; part of the scope-cache fingerprint so
    /// catalog updates invalidate stale classifications.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Number of snapshot rebuilds since startup.
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    pub fn get(&self, slug: &str) -> Option<StrategyRecord> {
        self.snapshot().get(slug).cloned()
    }

    pub fn list(&self, active_only: bool) -> Vec<StrategyRecord> {
        let snapshot = self.snapshot();
        if active_only {
            snapshot.active().cloned().collect()
        } else {
            snapshot.records.clone()
        }
    }

    pub fn create(&self, strategy: &Strategy) -> Result<StrategyRecord> {
        strategy.validate().map_err(|reason| anyhow!(reason))?;
        let record = self.storage.create(strategy)?;
        self.rebuild()?;
        Ok(record)
    }

    pub fn update(&self, slug: &str, strategy: &Strategy) -> Result<StrategyRecord> {
        strategy.validate().map_err(|reason| anyhow!(reason))?;
        let record = self.storage.update(slug, strategy)?;
        self.rebuild()?;
        Ok(record)
    }

    pub fn set_active(&self, slug: &str, is_active: bool) -> Result<StrategyRecord> {
        let record = self.storage.set_active(slug, is_active)?;
        self.rebuild()?;
        Ok(record)
    }

    pub fn delete(&self, slug: &str) -> Result<()> {
        self.storage.remove(slug)?;
        self.rebuild()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Depth, TimeWindow};
    use redb::Database;
    use tempfile::tempdir;

    fn sample(slug: &str, priority: i32) -> Strategy {
        serde_yaml::from_str(&format!(
            r#"
meta:
  slug: {slug}
  version: 1
  category: news
  time_window: day
  depth: brief
  priority: {priority}
"#
        ))
        .unwrap()
    }

    fn open_catalog() -> (StrategyCatalog, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        let storage = StrategyStorage::new(db).unwrap();
        let catalog = StrategyCatalog::open(storage, &temp_dir.path().join("none")).unwrap();
        (catalog, temp_dir)
    }

    #[test]
    fn create_invalidates_snapshot() {
        let (catalog, _tmp) = open_catalog();
        let before = catalog.snapshot();
        catalog.create(&sample("a", 0)).unwrap();
        let after = catalog.snapshot();
        assert!(after.version > before.version);
        assert!(after.get("a").is_some());
        assert!(before.get("a").is_none());
    }

    #[test]
    fn select_prefers_priority_then_slug() {
        let (catalog, _tmp) = open_catalog();
        catalog.create(&sample("bbb", 5)).unwrap();
        catalog.create(&sample("aaa", 5)).unwrap();
        catalog.create(&sample("zzz", 1)).unwrap();

        let snapshot = catalog.snapshot();
        assert_eq!(
            snapshot.select("news", TimeWindow::Day, Depth::Brief),
            Some("aaa")
        );
    }

    #[test]
    fn select_skips_inactive() {
        let (catalog, _tmp) = open_catalog();
        catalog.create(&sample("only", 0)).unwrap();
        catalog.set_active("only", false).unwrap();

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.select("news", TimeWindow::Day, Depth::Brief), None);
    }

    #[test]
    fn bootstrap_seeds_empty_store() {
        let temp_dir = tempdir().unwrap();
        let strategies_dir = temp_dir.path().join("strategies");
        std::fs::create_dir(&strategies_dir).unwrap();
        std::fs::write(
            strategies_dir.join("brief.yaml"),
            r#"
meta: {slug: news/brief, version: 1, category: news, time_window: day, depth: brief}
"#,
        )
        .unwrap();
        std::fs::write(strategies_dir.join("broken.yaml"), ": : :").unwrap();

        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        let storage = StrategyStorage::new(db).unwrap();
        let catalog = StrategyCatalog::open(storage, &strategies_dir).unwrap();

        assert!(catalog.get("news/brief").is_some());
        assert_eq!(catalog.list(true).len(), 1);
    }

    #[test]
    fn bootstrap_skipped_when_store_populated() {
        let temp_dir = tempdir().unwrap();
        let strategies_dir = temp_dir.path().join("strategies");
        std::fs::create_dir(&strategies_dir).unwrap();
        std::fs::write(
            strategies_dir.join("brief.yaml"),
            r#"
meta: {slug: news/brief, version: 1, category: news, time_window: day, depth: brief}
"#,
        )
        .unwrap();

        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        let storage = StrategyStorage::new(db).unwrap();
        storage.create(&sample("existing", 0)).unwrap();

        let catalog = StrategyCatalog::open(storage, &strategies_dir).unwrap();
        assert!(catalog.get("existing").is_some());
        assert!(catalog.get("news/brief").is_none());
    }

    #[test]
    fn invalid_strategy_rejected() {
        let (catalog, _tmp) = open_catalog();
        let mut bad = sample("x", 0);
        bad.meta.slug = String::new();
        assert!(catalog.create(&bad).is_err());
    }
}
