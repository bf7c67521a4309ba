//! TOML configuration schema.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `~/.myclaw/config.toml`:
//! ```toml
//! provider = "openai"
//! model = "gpt-4o-mini"
//! workspace = "."
//!
//! [runtime]
//! max_steps = 8
//! context_window_size = 20
//!
//! [runtime.checks.eslint]
//! enabled = true
//!
//! [review]
//! enabled = false
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── ProviderKind ───────────────────────────────────────────────────────────

/// Which LLM backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic, network-free provider used for tests and `doctor`.
    #[default]
    Mock,
    Openai,
    Anthropic,
}

impl ProviderKind {
    /// Case-insensitive parse, for values arriving from environment variables.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Some(Self::Mock),
            "openai" => Some(Self::Openai),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }
}

// ─── ChecksConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EslintCheckConfig {
    pub enabled: bool,
}

impl Default for EslintCheckConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ChecksConfig {
    pub eslint: EslintCheckConfig,
}

// ─── RuntimeConfig ──────────────────────────────────────────────────────────

fn default_model_timeout_ms() -> u64 {
    45_000
}

fn default_model_retry_count() -> u32 {
    1
}

fn default_max_steps() -> usize {
    8
}

fn default_context_window_size() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bounds a single model-completion attempt. Must be > 0.
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,
    /// Retries on timeout or transport error. Must be > 0.
    #[serde(default = "default_model_retry_count")]
    pub model_retry_count: u32,
    /// Upper bound on tool-use steps within a single turn.
    pub max_steps: usize,
    /// Sliding-window compression trigger, in messages.
    pub context_window_size: usize,
    pub checks: ChecksConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model_timeout_ms: default_model_timeout_ms(),
            model_retry_count: default_model_retry_count(),
            max_steps: default_max_steps(),
            context_window_size: default_context_window_size(),
            checks: ChecksConfig::default(),
        }
    }
}

// ─── ReviewConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ReviewConfig {
    pub enabled: bool,
    /// File extension (without leading dot) to shell command template,
    /// e.g. `"py" -> "python3 -m py_compile {file}"`.
    pub tools: HashMap<String, String>,
}

// ─── Config ─────────────────────────────────────────────────────────────────

/// Top-level, immutable application configuration.
///
/// Loaded once at startup by [`super::loader`]; every other component only
/// ever reads it through a shared `Arc<Config>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderKind,
    pub model: String,
    /// Override base URL for OpenAI-compatible or Anthropic endpoints.
    pub base_url: Option<String>,
    /// Root directory the agent is allowed to read and write under.
    pub workspace: String,
    /// Override for the agent's home directory (sessions, metrics, memory).
    pub home_dir: Option<String>,
    pub memory_file: Option<String>,
    pub runtime: RuntimeConfig,
    pub review: ReviewConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            workspace: ".".to_string(),
            home_dir: None,
            memory_file: None,
            runtime: RuntimeConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl Config {
    /// Resolve the effective home directory: explicit `home_dir`, else
    /// `MYCLAW_HOME`, else `~/.myclaw`.
    pub fn resolved_home_dir(&self) -> std::path::PathBuf {
        if let Some(ref h) = self.home_dir {
            return std::path::PathBuf::from(h);
        }
        if let Ok(h) = std::env::var("MYCLAW_HOME") {
            return std::path::PathBuf::from(h);
        }
        dirs::home_dir()
            .map(|h| h.join(".myclaw"))
            .unwrap_or_else(|| std::path::PathBuf::from(".myclaw"))
    }

    pub fn sessions_dir(&self) -> std::path::PathBuf {
        self.resolved_home_dir().join("sessions")
    }

    pub fn metrics_dir(&self) -> std::path::PathBuf {
        self.resolved_home_dir().join("metrics")
    }

    pub fn memory_file_path(&self) -> std::path::PathBuf {
        self.memory_file
            .as_ref()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| self.resolved_home_dir().join("memory.md"))
    }

    pub fn user_profile_path(&self) -> std::path::PathBuf {
        self.resolved_home_dir().join("user-profile.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.runtime.model_timeout_ms, 45_000);
        assert_eq!(cfg.runtime.model_retry_count, 1);
        assert_eq!(cfg.runtime.max_steps, 8);
        assert_eq!(cfg.runtime.context_window_size, 20);
        assert!(cfg.runtime.checks.eslint.enabled);
        assert_eq!(cfg.provider, ProviderKind::Mock);
        assert!(!cfg.review.enabled);
    }

    #[test]
    fn provider_kind_from_str_loose() {
        assert_eq!(ProviderKind::from_str_loose("OpenAI"), Some(ProviderKind::Openai));
        assert_eq!(ProviderKind::from_str_loose("anthropic"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::from_str_loose("MOCK"), Some(ProviderKind::Mock));
        assert_eq!(ProviderKind::from_str_loose("bogus"), None);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
            model = "gpt-4o"

            [runtime]
            max_steps = 12
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.model, "gpt-4o");
        assert_eq!(cfg.runtime.max_steps, 12);
        assert_eq!(cfg.runtime.model_timeout_ms, 45_000);
        assert_eq!(cfg.workspace, ".");
    }
}
