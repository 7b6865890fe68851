//! LLM client module for oragent
//!
//! Provides the `LlmClient` completion capability, the OpenAI-compatible,
//! Anthropic and Gemini backends, and the gateway that routes between them.

mod anthropic;
pub mod client;
mod error;
mod gateway;
mod gemini;
mod openai;
mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
pub use error::{LlmError, ProviderErrorKind, is_retryable_status};
pub use gateway::{CompletionGateway, LOCAL_PREFIX, ModelRoute};
pub use gemini::GeminiClient;
pub use openai::OpenAIClient;
pub use types::{CompletionOptions, CompletionRequest, CompletionResponse, Message, Role, StopReason, TokenUsage};
