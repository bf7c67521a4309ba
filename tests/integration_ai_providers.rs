// Integration tests for the OpenAI-compatible provider and the
// completion request/message builders it shares with the rest of the
// provider stack.

use myclaw::ai::providers::openai_compatible::OpenAICompatibleConfig;

#[cfg(test)]
mod tests {
    use super::OpenAICompatibleConfig;
    use myclaw::ai::provider::LLMProvider;
    use myclaw::ai::providers::OpenAICompatibleProvider;
    use myclaw::ai::types::{CompletionRequest, Message as AppMessage, MessageRole};
    use std::time::Duration;

    // =========================================================================
    // Provider Configuration Tests
    // =========================================================================

    #[test]
    fn test_openai_configuration() {
        let config = OpenAICompatibleConfig::openai("test-key-12345");
        assert_eq!(config.api_key, "test-key-12345");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.default_model, "gpt-4o-mini");
    }

    #[test]
    fn test_anthropic_configuration() {
        let config = OpenAICompatibleConfig::anthropic("test-key-67890");
        assert_eq!(config.api_key, "test-key-67890");
        assert_eq!(config.base_url, "https://api.anthropic.com/v1");
        assert_eq!(config.default_model, "claude-3-5-sonnet-latest");

        assert_eq!(
            config.extra_headers.get("anthropic-version"),
            Some(&"2023-06-01".to_string())
        );
    }

    #[test]
    fn test_custom_configuration_builder() {
        let config = OpenAICompatibleConfig::new("custom-key", "https://custom.api.com")
            .default_model("custom-model")
            .timeout(Duration::from_secs(60))
            .max_retries(5)
            .with_header("X-Custom-Header", "custom-value")
            .with_header("X-Another-Header", "another-value");

        assert_eq!(config.api_key, "custom-key");
        assert_eq!(config.base_url, "https://custom.api.com");
        assert_eq!(config.default_model, "custom-model");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert_eq!(
            config.extra_headers.get("X-Custom-Header"),
            Some(&"custom-value".to_string())
        );
        assert_eq!(
            config.extra_headers.get("X-Another-Header"),
            Some(&"another-value".to_string())
        );
    }

    // =========================================================================
    // Provider Creation Tests
    // =========================================================================

    #[test]
    fn test_provider_creation_openai() {
        let config = OpenAICompatibleConfig::openai("test-key");
        let result = OpenAICompatibleProvider::new(config, "openai");
        assert!(result.is_ok());
        assert_eq!(result.unwrap().provider_name(), "openai");
    }

    #[test]
    fn test_provider_creation_anthropic() {
        let config = OpenAICompatibleConfig::anthropic("test-key");
        let result = OpenAICompatibleProvider::new(config, "anthropic");
        assert!(result.is_ok());
        assert_eq!(result.unwrap().provider_name(), "anthropic");
    }

    // =========================================================================
    // Provider Trait Implementation Tests
    // =========================================================================

    #[test]
    fn test_provider_supports_tools() {
        let config = OpenAICompatibleConfig::openai("test-key");
        let provider = OpenAICompatibleProvider::new(config, "openai").unwrap();
        assert!(provider.supports_tools());
    }

    #[test]
    fn test_provider_context_limit() {
        let config = OpenAICompatibleConfig::openai("test-key");
        let provider = OpenAICompatibleProvider::new(config, "openai").unwrap();
        assert_eq!(provider.context_limit(), 128_000);
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_configuration_values() {
        let config = OpenAICompatibleConfig::default();
        assert_eq!(config.api_key, "");
        assert_eq!(config.base_url, "");
        assert_eq!(config.default_model, "");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn test_timeout_configuration() {
        let config = OpenAICompatibleConfig::openai("test-key").timeout(Duration::from_secs(120));
        assert_eq!(config.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_retry_configuration() {
        let config = OpenAICompatibleConfig::openai("test-key").max_retries(10);
        assert_eq!(config.max_retries, 10);
    }

    // =========================================================================
    // CompletionRequest Builder Tests
    // =========================================================================

    #[test]
    fn test_completion_request_basic() {
        let request = CompletionRequest::new("gpt-4o-mini", vec![AppMessage::user("Explain Rust")]);

        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, MessageRole::User);
        assert_eq!(request.messages[0].content, "Explain Rust");
        assert_eq!(request.temperature, None);
        assert_eq!(request.max_tokens, None);
        assert_eq!(request.top_p, None);
    }

    #[test]
    fn test_completion_request_with_parameters() {
        let request = CompletionRequest::new(
            "gpt-4o-mini",
            vec![
                AppMessage::system("You are helpful"),
                AppMessage::user("Explain Rust"),
            ],
        )
        .with_temperature(0.7)
        .with_max_tokens(1000)
        .with_top_p(0.9);

        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(1000));
        assert_eq!(request.top_p, Some(0.9));
    }

    #[test]
    fn test_completion_request_multi_turn_conversation() {
        let request = CompletionRequest::new(
            "gpt-4o-mini",
            vec![
                AppMessage::user("What is Rust?"),
                AppMessage::assistant("Rust is a systems programming language"),
                AppMessage::user("Why is it safe?"),
            ],
        );

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, MessageRole::User);
        assert_eq!(request.messages[1].role, MessageRole::Assistant);
        assert_eq!(request.messages[2].role, MessageRole::User);
    }

    #[test]
    fn test_completion_request_empty_messages() {
        let request = CompletionRequest::new("gpt-4o-mini", vec![]);
        assert_eq!(request.messages.len(), 0);
    }

    // =========================================================================
    // Message Constructor Tests
    // =========================================================================

    #[test]
    fn test_message_constructors() {
        let system_msg = AppMessage::system("You are helpful");
        assert_eq!(system_msg.role, MessageRole::System);
        assert_eq!(system_msg.content, "You are helpful");

        let user_msg = AppMessage::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let assistant_msg = AppMessage::assistant("Hi there!");
        assert_eq!(assistant_msg.role, MessageRole::Assistant);
        assert_eq!(assistant_msg.content, "Hi there!");
    }

    #[test]
    fn test_message_multibyte_characters() {
        let msg = AppMessage::user("Hello 世界 🌍");
        assert_eq!(msg.content, "Hello 世界 🌍");
    }

    #[test]
    fn test_message_empty_content() {
        let msg = AppMessage::user("");
        assert_eq!(msg.content, "");
    }

    #[test]
    fn test_message_special_characters() {
        let special_content = "Test: \n\t\r\"'\\&<>";
        let msg = AppMessage::user(special_content);
        assert_eq!(msg.content, special_content);
    }

    #[test]
    fn test_message_very_long_content() {
        let long_content = "A".repeat(10000);
        let msg = AppMessage::user(&long_content);
        assert_eq!(msg.content.len(), 10000);
    }

    // =========================================================================
    // Edge Cases and Boundary Tests
    // =========================================================================

    #[test]
    fn test_temperature_boundary_values() {
        let request1 = CompletionRequest::new("gpt-4o-mini", vec![]).with_temperature(0.0);
        assert_eq!(request1.temperature, Some(0.0));

        let request2 = CompletionRequest::new("gpt-4o-mini", vec![]).with_temperature(2.0);
        assert_eq!(request2.temperature, Some(2.0));
    }

    #[test]
    fn test_max_tokens_boundary_values() {
        let request1 = CompletionRequest::new("gpt-4o-mini", vec![]).with_max_tokens(1);
        assert_eq!(request1.max_tokens, Some(1));

        let request2 = CompletionRequest::new("gpt-4o-mini", vec![]).with_max_tokens(128000);
        assert_eq!(request2.max_tokens, Some(128000));
    }

    #[test]
    fn test_model_id_with_provider_prefix() {
        let request = CompletionRequest::new("anthropic/claude-3-5-sonnet-latest", vec![AppMessage::user("Test")]);
        assert_eq!(request.model, "anthropic/claude-3-5-sonnet-latest");
    }
}
