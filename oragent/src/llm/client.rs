//! LlmClient trait definition

use async_trait::async_trait;
use std::sync::Arc;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// Stateless LLM client - each call is independent (fresh context)
///
/// Implementations never retry internally and never cache; the repair loop
/// owns the retry policy. Every backend, and the routing gateway in front of
/// them, implements this same capability.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single completion request and wait for the full reply
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        (**self).complete(request).await
    }
}
