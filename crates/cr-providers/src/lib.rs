//! cr-providers: LLM provider implementations for company-research
//!
//! This crate provides implementations of the Provider trait for the
//! OpenAI and Anthropic APIs, a retrying wrapper, and the model selector
//! that maps run-scoped model ids to configured backends.

pub mod anthropic;
pub mod openai;
pub mod retry;
pub mod select;
mod wire;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;
pub use retry::RetryingProvider;
pub use select::{lookup, BackendConfig, ModelSpec, ProviderSelector, MODEL_REGISTRY};
