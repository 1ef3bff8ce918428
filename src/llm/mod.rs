//! LLM client layer: trait, wire client, factory and test mock.

pub mod client;
pub mod factory;
pub mod mock;
pub mod openai;

pub use client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, Role, ToolCall,
    ToolChoice, ToolSchema,
};
pub use factory::{LlmFactory, PhaseLlm};
pub use mock::{MockLlmClient, MockStep};
pub use openai::OpenAiCompatClient;
