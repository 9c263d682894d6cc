//! cr-core: Core types and traits for company-research
//!
//! This crate provides the foundational types and traits used throughout
//! the research pipeline: chat messages, the provider contract, tool
//! schemas, typed structured generation and upstream retry.

pub mod error;
pub mod message;
pub mod provider;
pub mod retry;
pub mod structured;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::Error;
pub use message::{Message, Role, ToolCall, Usage};
pub use provider::{
    CompletionRequest, CompletionResponse, FinishReason, ModelHandle, ModelSelector, Provider,
    ToolChoice,
};
pub use retry::{retry, RetryPolicy};
pub use structured::{generate_structured, generate_tool_call, StructuredOutput};
pub use tool::{PropertySchema, Tool, ToolDefinition, ToolOutput, ToolParameters};

pub type Result<T> = std::result::Result<T, Error>;
