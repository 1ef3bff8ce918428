//! Global settings rows, keyed by setting name.

use anyhow::Result;
use serde_json::Value;

use crate::models::GlobalSetting;
use crate::storage::record::{RecordStore, record_store};

record_store! {
    pub struct SettingsStorage { record: GlobalSetting, table: "global_settings" }
}

impl SettingsStorage {
    pub fn put(&self, key: &str, value: Value) -> Result<GlobalSetting> {
        let setting = GlobalSetting::new(key, value);
        self.write(key, &setting)?;
        Ok(setting)
    }

    pub fn get(&self, key: &str) -> Result<Option<GlobalSetting>> {
        self.read(key)
    }

    pub fn list(&self) -> Result<Vec<GlobalSetting>> {
        self.scan()
    }
}
