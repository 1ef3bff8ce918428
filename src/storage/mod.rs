//! Persistence layer: one redb database, one table per entity type.

pub mod checkpoint;
pub(crate) mod record;
pub mod scope_cache;
pub mod settings;
pub mod strategy;
pub mod task;

pub use checkpoint::CheckpointStorage;
pub use record::RecordStore;
pub use scope_cache::{SCOPE_CACHE_TTL_HOURS, ScopeCacheStorage};
pub use settings::SettingsStorage;
pub use strategy::StrategyStorage;
pub use task::ResearchTaskStorage;

use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

/// Central storage manager that initializes all tables.
pub struct Storage {
    pub strategies: StrategyStorage,
    pub tasks: ResearchTaskStorage,
    pub scope_cache: ScopeCacheStorage,
    pub settings: SettingsStorage,
    pub checkpoints: CheckpointStorage,
}

impl Storage {
    /// Open (or create) the database at `path` and initialize all tables.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Arc::new(Database::create(path)?);
        Ok(Self {
            strategies: StrategyStorage::new(db.clone())?,
            tasks: ResearchTaskStorage::new(db.clone())?,
            scope_cache: ScopeCacheStorage::new(db.clone())?,
            settings: SettingsStorage::new(db.clone())?,
            checkpoints: CheckpointStorage::new(db)?,
        })
    }

    /// In a fresh temporary directory, for tests.
    #[cfg(test)]
    pub fn new_in_temp() -> Result<(Arc<Self>, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let storage = Self::new(&temp_dir.path().join("test.db"))?;
        Ok((Arc::new(storage), temp_dir))
    }
}
