//! A deterministic, network-free provider.
//!
//! Used by `myclaw doctor` (to validate the rest of the pipeline without an
//! API key) and by integration tests that need to script a specific sequence
//! of model turns without depending on a real backend.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::ai::provider::{LLMProvider, Result};
use crate::ai::types::{CompletionRequest, CompletionResponse};

/// Provider that replays a fixed script of responses, one per `complete()`
/// call. Once the script is exhausted it keeps returning the last entry, so
/// tests don't need to pad scripts to cover stop conditions they don't care
/// about.
pub struct MockProvider {
    script: Mutex<Vec<CompletionResponse>>,
    cursor: Mutex<usize>,
}

impl MockProvider {
    /// Default single-response provider: replies "Mock response." and stops.
    pub fn new() -> Self {
        Self::with_script(vec![CompletionResponse {
            content: "Mock response.".to_string(),
            model: "mock".to_string(),
            tool_calls: Vec::new(),
            usage: None,
            finish_reason: Some("stop".to_string()),
        }])
    }

    /// Build a provider that plays back `script` in order.
    pub fn with_script(script: Vec<CompletionResponse>) -> Self {
        Self {
            script: Mutex::new(script),
            cursor: Mutex::new(0),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
        let script = self.script.lock().unwrap();
        if script.is_empty() {
            return Err("mock provider script is empty".to_string());
        }
        let mut cursor = self.cursor.lock().unwrap();
        let idx = (*cursor).min(script.len() - 1);
        let response = script[idx].clone();
        if *cursor < script.len() - 1 {
            *cursor += 1;
        }
        Ok(response)
    }

    fn context_limit(&self) -> usize {
        128_000
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}
