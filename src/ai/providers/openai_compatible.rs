use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::ai::provider::{LLMProvider, Result};
use crate::ai::types::{
    CompletionRequest, CompletionResponse, Message as AppMessage, MessageRole,
    ToolCallDescriptor, ToolDefinition, TokenUsage,
};

/// Wire form of a [`ToolCallDescriptor`] inside an outgoing assistant
/// message. The API wants `arguments` re-serialized as a JSON string, not
/// the inline object `ToolCallDescriptor` holds.
#[derive(Debug, Clone, Serialize)]
struct ApiRequestToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: ApiRequestToolCallFunction,
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequestToolCallFunction {
    name: String,
    arguments: String,
}

/// Default timeout for HTTP requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default HTTP-level retry attempts for transport/5xx failures. Separate
/// from `runtime.model_retry_count`, which governs whole-completion retries
/// at the [`super::reliable::ReliableProvider`] layer.
const DEFAULT_HTTP_RETRIES: u32 = 2;

/// OpenAI-compatible message format for API requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    /// Present only on assistant messages that invoked tools. Every
    /// compatible gateway requires this array on the assistant turn a
    /// tool-role message answers, or it rejects the request outright.
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiRequestToolCall>>,
}

#[derive(Debug, Clone, Serialize)]
struct ApiFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct ApiToolDef {
    #[serde(rename = "type")]
    kind: String,
    function: ApiFunctionDef,
}

/// OpenAI-compatible chat completion request.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    /// Legacy parameter, used by older models and non-OpenAI providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    /// Used by newer OpenAI models in place of `max_tokens`.
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ChatCompletionResponse {
    id: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    model: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Choice {
    message: ApiResponseMessage,
    finish_reason: Option<String>,
    index: u32,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ApiToolCall {
    id: String,
    function: ApiToolCallFunction,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ApiToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Configuration for the OpenAI-compatible provider.
///
/// Works with any API that speaks the OpenAI chat-completion protocol,
/// including OpenAI itself and Anthropic's OpenAI-compatibility endpoint.
#[derive(Debug, Clone)]
pub struct OpenAICompatibleConfig {
    /// API key for authentication.
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Additional HTTP headers (e.g. Anthropic's `anthropic-version`).
    pub extra_headers: HashMap<String, String>,
}

impl Default for OpenAICompatibleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            default_model: String::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_HTTP_RETRIES,
            extra_headers: HashMap::new(),
        }
    }
}

impl OpenAICompatibleConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_model(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: model.into(),
            ..Default::default()
        }
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    /// Configuration for OpenAI.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, "https://api.openai.com/v1", "gpt-4o-mini")
    }

    /// Configuration for Anthropic's OpenAI-compatible endpoint.
    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self::with_model(
            api_key,
            "https://api.anthropic.com/v1",
            "claude-3-5-sonnet-latest",
        )
        .with_header("anthropic-version", "2023-06-01")
    }
}

/// Generic OpenAI-compatible provider.
///
/// Treats every backend identically at the protocol level; the only
/// differences are base URL, auth header presence, and extra headers.
pub struct OpenAICompatibleProvider {
    client: Client,
    config: OpenAICompatibleConfig,
    provider_name: String,
}

impl OpenAICompatibleProvider {
    pub fn new(config: OpenAICompatibleConfig, provider_name: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            config,
            provider_name: provider_name.into(),
        })
    }

    fn convert_message(msg: &AppMessage) -> ApiMessage {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };

        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|c| ApiRequestToolCall {
                        id: c.id.clone(),
                        kind: "function".to_string(),
                        function: ApiRequestToolCallFunction {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };

        ApiMessage {
            role: role.to_string(),
            content: msg.content.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls,
        }
    }

    fn convert_tool(def: &ToolDefinition) -> ApiToolDef {
        ApiToolDef {
            kind: "function".to_string(),
            function: ApiFunctionDef {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            },
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let is_openai = self.provider_name == "openai";
        let is_o1_model = request.model.starts_with("o1-") || request.model.starts_with("o1");

        let temperature = if is_openai && is_o1_model {
            None
        } else {
            request.temperature
        };

        let (max_tokens, max_completion_tokens) = if is_openai && is_o1_model {
            (None, None)
        } else if is_openai {
            (None, request.max_tokens)
        } else {
            (request.max_tokens, None)
        };

        let top_p = if is_openai && is_o1_model {
            None
        } else {
            request.top_p
        };

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.iter().map(Self::convert_tool).collect())
        };

        ChatCompletionRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            tools,
            temperature,
            max_tokens,
            max_completion_tokens,
            top_p,
        }
    }

    fn get_auth_header(&self) -> Option<String> {
        if self.config.api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.config.api_key))
        }
    }

    async fn execute_with_retry(
        &self,
        request_fn: impl Fn() -> Result<reqwest::RequestBuilder>,
    ) -> Result<Response> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2_u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            let builder = request_fn()?;
            match builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        let error_body = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        return Err(format!("API request failed with status {status}: {error_body}"));
                    }

                    last_error = Some(format!("API request failed with status {status}"));
                }
                Err(e) => {
                    last_error = Some(format!("HTTP request failed: {e}"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| "Request failed".to_string()))
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request.model.clone();
        match self.complete_inner(request).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider_name,
                    error = %e,
                    "completion failed after retries; returning safe fallback response"
                );
                Ok(crate::ai::provider::safe_fallback_response(model))
            }
        }
    }

    fn context_limit(&self) -> usize {
        128_000
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

impl OpenAICompatibleProvider {
    async fn complete_inner(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let api_request = self.build_request(&request);

        let mut request_builder = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Content-Type", "application/json");

        if let Some(auth) = self.get_auth_header() {
            request_builder = request_builder.header("Authorization", auth);
        }
        for (key, value) in &self.config.extra_headers {
            request_builder = request_builder.header(key, value);
        }

        let response = self
            .execute_with_retry(|| {
                request_builder
                    .try_clone()
                    .ok_or_else(|| "Failed to clone request builder".to_string())
                    .map(|b| b.json(&api_request))
            })
            .await?;

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse API response: {e}"))?;

        let choice = api_response
            .choices
            .first()
            .ok_or_else(|| "No choices in API response".to_string())?;

        let tool_calls = choice
            .message
            .tool_calls
            .iter()
            .map(|c| {
                let arguments = serde_json::from_str(&c.function.arguments)
                    .unwrap_or(serde_json::Value::Null);
                ToolCallDescriptor {
                    id: c.id.clone(),
                    name: c.function.name.clone(),
                    arguments,
                }
            })
            .collect();

        Ok(CompletionResponse {
            content: choice.message.content.clone().unwrap_or_default(),
            model: api_response.model,
            tool_calls,
            usage: api_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason.clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn config_openai() {
        let config = OpenAICompatibleConfig::openai("test-key");
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn config_anthropic_has_version_header() {
        let config = OpenAICompatibleConfig::anthropic("test-key");
        assert_eq!(
            config.extra_headers.get("anthropic-version"),
            Some(&"2023-06-01".to_string())
        );
    }

    #[test]
    fn config_builder() {
        let config = OpenAICompatibleConfig::new("key", "https://api.test.com")
            .default_model("test-model")
            .timeout(Duration::from_secs(60))
            .max_retries(5)
            .with_header("X-Custom-Header", "value");

        assert_eq!(config.default_model, "test-model");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert_eq!(
            config.extra_headers.get("X-Custom-Header"),
            Some(&"value".to_string())
        );
    }

    #[test]
    fn message_conversion_preserves_tool_call_id() {
        let tool_msg = AppMessage::tool("42", "call_1", "read_file");
        let api_msg = OpenAICompatibleProvider::convert_message(&tool_msg);
        assert_eq!(api_msg.role, "tool");
        assert_eq!(api_msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(api_msg.tool_calls.is_none());
    }

    #[test]
    fn message_conversion_carries_assistant_tool_calls() {
        let descriptor = ToolCallDescriptor {
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            arguments: serde_json::json!({"path": "a.txt"}),
        };
        let assistant_msg =
            AppMessage::assistant_with_tool_calls(String::new(), vec![descriptor]);
        let api_msg = OpenAICompatibleProvider::convert_message(&assistant_msg);
        let calls = api_msg.tool_calls.expect("tool_calls present");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "read_file");
        assert_eq!(calls[0].function.arguments, r#"{"path":"a.txt"}"#);
    }

    #[test]
    fn provider_creation() {
        let config = OpenAICompatibleConfig::openai("test-key");
        let provider = OpenAICompatibleProvider::new(config, "openai");
        assert!(provider.is_ok());
    }

    #[test]
    fn build_request_includes_tools() {
        let config = OpenAICompatibleConfig::openai("test-key");
        let provider = OpenAICompatibleProvider::new(config, "openai").unwrap();

        let tool = ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        };

        let request = CompletionRequest::new("gpt-4o-mini", vec![AppMessage::user("hi")])
            .with_tools(vec![tool]);

        let api_request = provider.build_request(&request);
        assert!(api_request.tools.is_some());
        assert_eq!(api_request.tools.unwrap()[0].function.name, "read_file");
    }

    #[test]
    fn build_request_omits_tools_field_when_empty() {
        let config = OpenAICompatibleConfig::openai("test-key");
        let provider = OpenAICompatibleProvider::new(config, "openai").unwrap();
        let request = CompletionRequest::new("gpt-4o-mini", vec![AppMessage::user("hi")]);
        let api_request = provider.build_request(&request);
        assert!(api_request.tools.is_none());
    }
}
