//! briefcast: scheduled research briefings on a declarative workflow
//! engine.
//!
//! A request is classified onto a strategy, run through a
//! Scope → Fill → Research → Finalize → QC pipeline against search and LLM
//! providers, and delivered as a cited report over webhooks or directly.

pub mod adapters;
pub mod api;
pub mod api_response;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod llm;
pub mod models;
pub mod services;
pub mod storage;
pub mod template;

pub use config::ServerConfig;
pub use engine::{WorkflowEngine, WorkflowRequest, WorkflowResult};
pub use error::{Result, WorkflowError};
