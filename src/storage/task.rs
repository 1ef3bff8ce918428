//! Subscription task rows, keyed by task UUID.

use anyhow::{Result, bail};
use uuid::Uuid;

use crate::models::{Frequency, ResearchTask};
use crate::storage::record::{RecordStore, record_store};

record_store! {
    pub struct ResearchTaskStorage { record: ResearchTask, table: "research_tasks" }
}

impl ResearchTaskStorage {
    pub fn create(&self, task: &ResearchTask) -> Result<()> {
        if !self.insert_new(&task.id.to_string(), task)? {
            bail!("task '{}' already exists", task.id);
        }
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Result<Option<ResearchTask>> {
        self.read(&id.to_string())
    }

    pub fn update(&self, task: &ResearchTask) -> Result<()> {
        let key = task.id.to_string();
        if !self.contains(&key)? {
            bail!("task '{}' not found", task.id);
        }
        self.write(&key, task)
    }

    pub fn remove(&self, id: &Uuid) -> Result<()> {
        if !self.remove_key(&id.to_string())? {
            bail!("task '{id}' not found");
        }
        Ok(())
    }

    fn list_where(&self, keep: impl Fn(&ResearchTask) -> bool) -> Result<Vec<ResearchTask>> {
        let mut tasks: Vec<ResearchTask> =
            self.scan()?.into_iter().filter(|task| keep(task)).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    pub fn list_by_email(&self, email: &str) -> Result<Vec<ResearchTask>> {
        self.list_where(|t| t.email == email)
    }

    /// Active tasks matching a frequency, the batch executor's work list.
    pub fn list_active_by_frequency(&self, frequency: Frequency) -> Result<Vec<ResearchTask>> {
        self.list_where(|t| t.is_active && t.frequency == frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::Database;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> (ResearchTaskStorage, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        (ResearchTaskStorage::new(db).unwrap(), temp_dir)
    }

    #[test]
    fn crud_round_trip() {
        let (storage, _tmp) = setup();
        let mut task = ResearchTask::new("a@e.com", "AI regulation", Frequency::Daily);
        storage.create(&task).unwrap();

        task.research_topic = "AI policy".into();
        storage.update(&task).unwrap();

        let read = storage.get(&task.id).unwrap().unwrap();
        assert_eq!(read.research_topic, "AI policy");

        storage.remove(&task.id).unwrap();
        assert!(storage.get(&task.id).unwrap().is_none());
    }

    #[test]
    fn update_missing_fails() {
        let (storage, _tmp) = setup();
        let task = ResearchTask::new("a@e.com", "x", Frequency::Daily);
        assert!(storage.update(&task).is_err());
    }

    #[test]
    fn frequency_filter_skips_inactive() {
        let (storage, _tmp) = setup();
        let daily = ResearchTask::new("a@e.com", "one", Frequency::Daily);
        let weekly = ResearchTask::new("a@e.com", "two", Frequency::Weekly);
        let mut paused = ResearchTask::new("b@e.com", "three", Frequency::Daily);
        paused.is_active = false;

        storage.create(&daily).unwrap();
        storage.create(&weekly).unwrap();
        storage.create(&paused).unwrap();

        let found = storage.list_active_by_frequency(Frequency::Daily).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, daily.id);
    }

    #[test]
    fn email_filter() {
        let (storage, _tmp) = setup();
        storage
            .create(&ResearchTask::new("a@e.com", "one", Frequency::Daily))
            .unwrap();
        storage
            .create(&ResearchTask::new("b@e.com", "two", Frequency::Daily))
            .unwrap();

        let found = storage.list_by_email("a@e.com").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email, "a@e.com");
    }
}
