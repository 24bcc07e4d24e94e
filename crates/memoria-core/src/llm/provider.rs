//! LlmProvider trait definition.
//!
//! This is the abstraction the memory subsystem calls for query rewriting and
//! fact extraction. Uses RPITIT for `complete`; both callers need a single
//! non-streaming completion.

use memoria_types::llm::{CompletionRequest, CompletionResponse, LlmError};

/// Trait for chat-completion backends.
///
/// Implementations live in memoria-infra (e.g., `OpenAiCompatibleProvider`).
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g., "openai_compatible").
    fn name(&self) -> &str;

    /// Model used when a request leaves `model` empty.
    fn model(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;
}
