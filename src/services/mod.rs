//! Service layer: strategy catalog, settings, batch execution, webhooks.

pub mod batch;
pub mod settings;
pub mod strategy;
pub mod webhook;

pub use batch::{BatchExecutor, BatchStarted};
pub use settings::SettingsService;
pub use strategy::{CatalogSnapshot, StrategyCatalog};
pub use webhook::WebhookSender;
