use std::sync::Arc;
use std::time::Duration;

use crate::ai::provider::LLMProvider;
use crate::config::{Config, ProviderKind};

pub mod mock;
pub mod openai_compatible;
pub mod reliable;

pub use openai_compatible::{OpenAICompatibleConfig, OpenAICompatibleProvider};
pub use reliable::ReliableProvider;

/// Build the provider a session should talk to, from the resolved `Config`.
///
/// `openai` and `anthropic` both go through [`OpenAICompatibleProvider`] —
/// Anthropic is just a different base URL and an extra header on the same
/// HTTP protocol, not a separate client. Per-provider environment variables
/// (`OPENAI_API_KEY`/`OPENAI_BASE_URL`/`OPENAI_MODEL`, and the `ANTHROPIC_*`
/// equivalents) take priority over `config.base_url`/`config.model` when
/// set, matching how every OpenAI-SDK-compatible CLI resolves credentials.
pub fn build_provider(config: &Config) -> Result<Arc<dyn LLMProvider>, String> {
    match config.provider {
        ProviderKind::Mock => Ok(Arc::new(mock::MockProvider::new())),
        ProviderKind::Openai => {
            let mut api_config = OpenAICompatibleConfig::openai(
                std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            );
            if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
                api_config.base_url = base_url;
            } else if let Some(base_url) = &config.base_url {
                api_config.base_url = base_url.clone();
            }
            api_config.default_model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| config.model.clone());
            api_config.timeout = Duration::from_millis(config.runtime.model_timeout_ms);
            let primary = Arc::new(OpenAICompatibleProvider::new(api_config, "openai")?);
            Ok(Arc::new(with_retry(primary, config)))
        }
        ProviderKind::Anthropic => {
            let mut api_config = OpenAICompatibleConfig::anthropic(
                std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            );
            if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL") {
                api_config.base_url = base_url;
            } else if let Some(base_url) = &config.base_url {
                api_config.base_url = base_url.clone();
            }
            api_config.default_model =
                std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| config.model.clone());
            api_config.timeout = Duration::from_millis(config.runtime.model_timeout_ms);
            let primary = Arc::new(OpenAICompatibleProvider::new(api_config, "anthropic")?);
            Ok(Arc::new(with_retry(primary, config)))
        }
    }
}

fn with_retry(primary: Arc<dyn LLMProvider>, config: &Config) -> ReliableProvider {
    ReliableProvider::new(primary).with_retries(
        config.runtime.model_retry_count,
        Duration::from_millis(500),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_config_builds_mock_provider() {
        let config = Config {
            provider: ProviderKind::Mock,
            ..Config::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.provider_name(), "mock");
    }

    #[test]
    fn openai_base_url_env_overrides_config() {
        unsafe {
            std::env::set_var("OPENAI_BASE_URL", "https://x.test/v1");
            std::env::set_var("OPENAI_MODEL", "gpt-test");
        }
        let config = Config {
            provider: ProviderKind::Openai,
            base_url: Some("https://ignored.test/v1".to_string()),
            model: "ignored-model".to_string(),
            ..Config::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.provider_name(), "openai");
        unsafe {
            std::env::remove_var("OPENAI_BASE_URL");
            std::env::remove_var("OPENAI_MODEL");
        }
    }

    #[test]
    fn anthropic_config_builds_provider_with_version_header() {
        let config = Config {
            provider: ProviderKind::Anthropic,
            ..Config::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.provider_name(), "anthropic");
    }
}
