//! Shared handler state.

use std::sync::Arc;

use crate::services::{BatchExecutor, SettingsService, StrategyCatalog};
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub catalog: Arc<StrategyCatalog>,
    pub batch: Arc<BatchExecutor>,
    pub settings: SettingsService,
}
