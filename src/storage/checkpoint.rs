//! Phase-boundary state snapshots, keyed by workflow thread id.

use anyhow::Result;

use crate::models::State;
use crate::storage::record::{RecordStore, record_store};

record_store! {
    pub struct CheckpointStorage { record: State, table: "checkpoints" }
}

impl CheckpointStorage {
    pub fn save(&self, state: &State) -> Result<()> {
        self.write(&state.thread_id, state)
    }

    pub fn load(&self, thread_id: &str) -> Result<Option<State>> {
        self.read(thread_id)
    }

    /// Drop a thread's snapshot once its result has been delivered.
    pub fn clear(&self, thread_id: &str) -> Result<()> {
        self.remove_key(thread_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Phase;
    use redb::Database;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn save_load_clear() {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        let storage = CheckpointStorage::new(db).unwrap();

        let mut state = State::new("thread-1", "a request");
        state.phase = Phase::Research;
        storage.save(&state).unwrap();

        let loaded = storage.load("thread-1").unwrap().unwrap();
        assert_eq!(loaded.phase, Phase::Research);
        assert_eq!(loaded.scope.user_request, "a request");

        storage.clear("thread-1").unwrap();
        assert!(storage.load("thread-1").unwrap().is_none());
    }
}
