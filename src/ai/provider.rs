use async_trait::async_trait;

/// Result type for AI operations.
pub type Result<T> = std::result::Result<T, String>;

use super::types::{CompletionRequest, CompletionResponse};

/// Text returned by [`safe_fallback_response`]. A turn that receives this
/// closes cleanly instead of unwinding — transient provider failures are
/// recovered inside `complete()`, never propagated to the turn loop.
pub const PROVIDER_EXHAUSTED_TEXT: &str =
    "I wasn't able to reach the model after retrying. Please try again.";

/// Build the safe-fallback response a provider returns once it has
/// exhausted retries (and, where applicable, its fallback chain). Callers
/// must never propagate the underlying transport error past this point.
pub fn safe_fallback_response(model: impl Into<String>) -> CompletionResponse {
    CompletionResponse {
        content: PROVIDER_EXHAUSTED_TEXT.to_string(),
        model: model.into(),
        tool_calls: Vec::new(),
        usage: None,
        finish_reason: Some("provider_exhausted".to_string()),
    }
}

/// Trait implemented by every LLM backend.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Complete a prompt and return the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Context window limit for this provider, in tokens.
    fn context_limit(&self) -> usize;

    /// Whether this provider supports native function/tool calling.
    fn supports_tools(&self) -> bool;

    /// Provider name, for logging and event payloads.
    fn provider_name(&self) -> &str;

    /// Pre-establish connection to provider. Default no-op; providers may override.
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}
