//! TOML configuration loading, env-var overrides, and atomic saves.
//!
//! # Loading order
//! 1. Parse `~/.myclaw/config.toml` (or the path in `MYCLAW_CONFIG`)
//! 2. Fall back to [`Config::default()`] if the file is missing
//! 3. Apply `MYCLAW_*` environment variable overrides — these win over both
//!    the file and the defaults
//!
//! # Atomic save
//! Writes to `<path>.tmp`, fsyncs, backs up the previous file, then renames
//! into place, so a crash mid-write never corrupts the config file.

use std::{
    env,
    fs,
    path::{Path, PathBuf},
};

use super::schema::{Config, ProviderKind};

// ─── default_config_path ─────────────────────────────────────────────────────

/// Return the default config file path: `~/.myclaw/config.toml`.
pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::home_dir()
        .map(|h| h.join(".myclaw").join("config.toml"))
        .ok_or_else(|| "could not determine home directory".to_string())
}

// ─── load_config ─────────────────────────────────────────────────────────────

/// Load [`Config`] from `path`, falling back to defaults if the file does
/// not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<Config, String> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<Config>(&content)
            .map_err(|e| format!("failed to parse config at {path:?}: {e}"))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(format!("failed to read config at {path:?}: {e}")),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path (or `MYCLAW_CONFIG`), creating no
/// directories and never failing: any error collapses to `Config::default()`
/// with env overrides still applied.
pub fn load_default_config() -> Config {
    let path = env::var("MYCLAW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml"))
        });

    load_config(&path).unwrap_or_else(|_| {
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        config
    })
}

// ─── apply_env_overrides ─────────────────────────────────────────────────────

/// Apply `MYCLAW_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `MYCLAW_PROVIDER`            → `provider` (`mock`/`openai`/`anthropic`)
/// - `MYCLAW_MODEL`               → `model`
/// - `MYCLAW_BASE_URL`            → `base_url`
/// - `MYCLAW_WORKSPACE`           → `workspace`
/// - `MYCLAW_HOME`                → `home_dir`
/// - `MYCLAW_MEMORY_FILE`         → `memory_file`
/// - `MYCLAW_MODEL_TIMEOUT_MS`    → `runtime.model_timeout_ms`
/// - `MYCLAW_MODEL_RETRY_COUNT`   → `runtime.model_retry_count`
/// - `MYCLAW_MAX_STEPS`           → `runtime.max_steps`
/// - `MYCLAW_CONTEXT_WINDOW_SIZE` → `runtime.context_window_size`
/// - `MYCLAW_ESLINT_ENABLED`      → `runtime.checks.eslint.enabled` (1/0)
/// - `MYCLAW_REVIEW_ENABLED`      → `review.enabled` (1/0)
fn apply_env_overrides(config: &mut Config) {
    if let Some(v) = non_empty_var("MYCLAW_PROVIDER") {
        if let Some(kind) = ProviderKind::from_str_loose(&v) {
            config.provider = kind;
        }
    }
    if let Some(v) = non_empty_var("MYCLAW_MODEL") {
        config.model = v;
    }
    if let Some(v) = non_empty_var("MYCLAW_BASE_URL") {
        config.base_url = Some(v);
    }
    if let Some(v) = non_empty_var("MYCLAW_WORKSPACE") {
        config.workspace = v;
    }
    if let Some(v) = non_empty_var("MYCLAW_HOME") {
        config.home_dir = Some(v);
    }
    if let Some(v) = non_empty_var("MYCLAW_MEMORY_FILE") {
        config.memory_file = Some(v);
    }
    if let Ok(v) = env::var("MYCLAW_MODEL_TIMEOUT_MS") {
        if let Ok(ms) = v.parse::<u64>() {
            config.runtime.model_timeout_ms = ms;
        }
    }
    if let Ok(v) = env::var("MYCLAW_MODEL_RETRY_COUNT") {
        if let Ok(n) = v.parse::<u32>() {
            config.runtime.model_retry_count = n;
        }
    }
    if let Ok(v) = env::var("MYCLAW_MAX_STEPS") {
        if let Ok(n) = v.parse::<usize>() {
            config.runtime.max_steps = n;
        }
    }
    if let Ok(v) = env::var("MYCLAW_CONTEXT_WINDOW_SIZE") {
        if let Ok(n) = v.parse::<usize>() {
            config.runtime.context_window_size = n;
        }
    }
    if let Some(v) = non_empty_var("MYCLAW_ESLINT_ENABLED") {
        config.runtime.checks.eslint.enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Some(v) = non_empty_var("MYCLAW_REVIEW_ENABLED") {
        config.review.enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
}

/// Read an environment variable, treating an empty-string value the same
/// as unset — so `FOO=` in a shell doesn't blank out a configured field.
fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

// ─── save_config ─────────────────────────────────────────────────────────────

/// Atomically save `config` to `path`.
///
/// Writes to `<path>.tmp`, backs up the existing file as `<path>.bak`, then
/// renames the temp file into place.
pub fn save_config(path: &Path, config: &Config) -> Result<(), String> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| format!("failed to serialise config: {e}"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create config dir: {e}"))?;
    }

    let tmp_path = path.with_extension("toml.tmp");

    fs::write(&tmp_path, &content)
        .map_err(|e| format!("failed to write temp config: {e}"))?;

    if path.exists() {
        let bak_path = path.with_extension("toml.bak");
        fs::copy(path, &bak_path)
            .map_err(|e| format!("failed to backup config: {e}"))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| format!("failed to replace config file: {e}"))?;

    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
