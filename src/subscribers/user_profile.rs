//! Heuristic extraction of durable user preferences.
//!
//! Scans user-role messages and compression summaries for signals —
//! coding languages mentioned, OS/shell/package-manager/node-version,
//! stylistic preferences, natural-language requests, recent focus — and
//! merges them into `<homeDir>/user-profile.json` on `summary` and
//! `session_end`. The file is a version-2 document; a legacy v1 file
//! (a bare JSON array of `{focus, at}` log entries) is migrated on read,
//! keeping only the latest entry's focus.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_bus::{AgentEvent, EventBus};

const PROFILE_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "packageManager")]
    pub package_manager: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "nodeVersion")]
    pub node_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StableProfile {
    #[serde(skip_serializing_if = "Option::is_none", rename = "preferredLanguage")]
    pub preferred_language: Option<String>,
    #[serde(rename = "codingLanguages")]
    pub coding_languages: Vec<String>,
    pub environment: Environment,
    pub preferences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "recentFocus")]
    pub recent_focus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "lastWorkspace")]
    pub last_workspace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfileDocument {
    pub version: u32,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "stableProfile")]
    pub stable_profile: StableProfile,
}

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    focus: Option<String>,
}

/// Read the profile file, migrating a legacy v1 array (of `{focus, ...}`
/// entries) into the v2 shape by keeping only the last entry's focus.
pub fn load_or_migrate(path: &std::path::Path) -> UserProfileDocument {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return fresh_document();
    };
    if let Ok(doc) = serde_json::from_str::<UserProfileDocument>(&raw) {
        if doc.version >= PROFILE_VERSION {
            return doc;
        }
    }
    if let Ok(entries) = serde_json::from_str::<Vec<LegacyEntry>>(&raw) {
        let mut doc = fresh_document();
        if let Some(last) = entries.into_iter().last() {
            doc.stable_profile.recent_focus = last.focus;
        }
        return doc;
    }
    fresh_document()
}

fn fresh_document() -> UserProfileDocument {
    UserProfileDocument {
        version: PROFILE_VERSION,
        updated_at: Utc::now(),
        stable_profile: StableProfile::default(),
    }
}

/// Signals extracted from a single session's transcript.
#[derive(Debug, Default)]
struct Extracted {
    preferred_language: Option<String>,
    coding_languages: HashSet<String>,
    os: Option<String>,
    shell: Option<String>,
    package_manager: Option<String>,
    node_version: Option<String>,
    preferences: Vec<String>,
    recent_focus: Option<String>,
    last_workspace: Option<String>,
}

const CODING_LANGUAGES: &[&str] = &[
    "rust", "python", "javascript", "typescript", "golang", "go", "java", "ruby", "c++", "c#",
    "kotlin", "swift", "php", "scala", "haskell", "elixir",
];

const PACKAGE_MANAGERS: &[&str] = &["npm", "pnpm", "yarn", "cargo", "pip", "poetry", "bundler"];
const SHELLS: &[&str] = &["zsh", "bash", "fish", "powershell"];

fn extract_from_text(text: &str, extracted: &mut Extracted) {
    let lower = text.to_ascii_lowercase();

    for lang in CODING_LANGUAGES {
        if word_present(&lower, lang) {
            extracted.coding_languages.insert(
                if *lang == "golang" { "go".to_string() } else { lang.to_string() },
            );
        }
    }
    for pm in PACKAGE_MANAGERS {
        if word_present(&lower, pm) {
            extracted.package_manager = Some(pm.to_string());
        }
    }
    for shell in SHELLS {
        if word_present(&lower, shell) {
            extracted.shell = Some(shell.to_string());
        }
    }
    if word_present(&lower, "macos") || lower.contains("mac os") || word_present(&lower, "darwin") {
        extracted.os = Some("macos".to_string());
    } else if word_present(&lower, "windows") {
        extracted.os = Some("windows".to_string());
    } else if word_present(&lower, "linux") {
        extracted.os = Some("linux".to_string());
    }

    if let Some(version) = find_node_version(&lower) {
        extracted.node_version = Some(version);
    }

    if let Some(lang) = find_preferred_natural_language(&lower) {
        extracted.preferred_language = Some(lang);
    }

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lowered = trimmed.to_ascii_lowercase();
        if lowered.contains("always ") || lowered.contains("never ") || lowered.starts_with("prefer") || lowered.contains("i prefer") {
            extracted.preferences.push(trimmed.chars().take(200).collect());
        }
    }

    let trimmed = text.trim();
    if !trimmed.is_empty() {
        extracted.recent_focus = Some(trimmed.chars().take(200).collect());
    }
}

fn word_present(haystack: &str, needle: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#').any(|w| w == needle)
}

fn find_node_version(lower: &str) -> Option<String> {
    let idx = lower.find("node")?;
    let rest = &lower[idx + 4..];
    let digits: String = rest
        .trim_start()
        .trim_start_matches("js")
        .trim_start()
        .trim_start_matches('v')
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() || !digits.chars().next().unwrap().is_ascii_digit() {
        None
    } else {
        Some(digits)
    }
}

fn find_preferred_natural_language(lower: &str) -> Option<String> {
    const MARKERS: &[&str] = &["respond in ", "reply in ", "speak in ", "answer in "];
    for marker in MARKERS {
        if let Some(idx) = lower.find(marker) {
            let rest = &lower[idx + marker.len()..];
            let word: String = rest.chars().take_while(|c| c.is_alphabetic()).collect();
            if !word.is_empty() {
                return Some(word);
            }
        }
    }
    None
}

/// Subscribes to the event bus and accumulates per-session signals,
/// merging them into the durable profile file on `summary`/`session_end`.
pub struct UserProfileSubscriber {
    profile_path: PathBuf,
    pending: Mutex<HashMap<Uuid, Extracted>>,
}

impl UserProfileSubscriber {
    pub fn new(profile_path: PathBuf) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { profile_path, pending: Mutex::new(HashMap::new()) })
    }

    pub fn attach(self: &std::sync::Arc<Self>, bus: &EventBus) {
        let this = self.clone();
        bus.subscribe(move |event| this.handle(event));
    }

    fn handle(&self, event: &AgentEvent) {
        match event {
            AgentEvent::Start { session_id, workspace, .. } => {
                let mut pending = self.pending.lock().unwrap();
                let entry = pending.entry(*session_id).or_default();
                entry.last_workspace = Some(workspace.clone());
            }
            AgentEvent::Message { session_id, role, content, .. } if role == "user" => {
                let mut pending = self.pending.lock().unwrap();
                let entry = pending.entry(*session_id).or_default();
                extract_from_text(content, entry);
            }
            AgentEvent::Summary { session_id, content, .. } => {
                {
                    let mut pending = self.pending.lock().unwrap();
                    let entry = pending.entry(*session_id).or_default();
                    extract_from_text(content, entry);
                }
                self.merge(*session_id);
            }
            AgentEvent::SessionEnd { session_id } => {
                self.merge(*session_id);
                self.pending.lock().unwrap().remove(session_id);
            }
            _ => {}
        }
    }

    fn merge(&self, session_id: Uuid) {
        let Some(extracted) = self.pending.lock().unwrap().get(&session_id).map(snapshot) else {
            return;
        };

        let mut doc = load_or_migrate(&self.profile_path);
        let profile = &mut doc.stable_profile;

        if extracted.preferred_language.is_some() {
            profile.preferred_language = extracted.preferred_language;
        }
        for lang in extracted.coding_languages {
            if !profile.coding_languages.contains(&lang) {
                profile.coding_languages.push(lang);
            }
        }
        if extracted.os.is_some() {
            profile.environment.os = extracted.os;
        }
        if extracted.shell.is_some() {
            profile.environment.shell = extracted.shell;
        }
        if extracted.package_manager.is_some() {
            profile.environment.package_manager = extracted.package_manager;
        }
        if extracted.node_version.is_some() {
            profile.environment.node_version = extracted.node_version;
        }
        for pref in extracted.preferences {
            if !profile.preferences.contains(&pref) {
                profile.preferences.push(pref);
            }
        }
        if extracted.recent_focus.is_some() {
            profile.recent_focus = extracted.recent_focus;
        }
        if extracted.last_workspace.is_some() {
            profile.last_workspace = extracted.last_workspace;
        }
        doc.updated_at = Utc::now();

        if let Some(parent) = self.profile_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(&doc) {
            let _ = std::fs::write(&self.profile_path, json);
        }
    }
}

fn snapshot(extracted: &Extracted) -> Extracted {
    Extracted {
        preferred_language: extracted.preferred_language.clone(),
        coding_languages: extracted.coding_languages.clone(),
        os: extracted.os.clone(),
        shell: extracted.shell.clone(),
        package_manager: extracted.package_manager.clone(),
        node_version: extracted.node_version.clone(),
        preferences: extracted.preferences.clone(),
        recent_focus: extracted.recent_focus.clone(),
        last_workspace: extracted.last_workspace.clone(),
    }
}
