//! In-memory session state: message history, compression summaries, and
//! the bookkeeping the turn engine needs to enforce its safety rails.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::oscillation::OscillationObserver;
use crate::agent::turn_engine::SYSTEM_PROMPT;
use crate::ai::provider::LLMProvider;
use crate::ai::types::Message;
use crate::session::interrupt_queue::InterruptQueue;

/// One compressed range of the message history: messages `[from, to)` were
/// folded into `content` and are no longer replayed verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryBlock {
    pub created_at: DateTime<Utc>,
    pub from: usize,
    pub to: usize,
    pub content: String,
}

/// A fact the async-check subscriber injects ahead of the next model turn,
/// e.g. a lint failure on a file the agent just wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interrupt {
    pub kind: String,
    pub detail: String,
}

/// A live, in-progress conversation.
///
/// Owns the append-only message list, the compression summaries that
/// replace its oldest entries, and the per-session state the turn engine's
/// safety rails consult: which paths have been read this session, and the
/// workspace version counter used to detect concurrent external edits.
pub struct Session {
    pub id: Uuid,
    pub workspace: PathBuf,
    pub log_path: PathBuf,
    pub provider: Arc<dyn LLMProvider>,
    pub model: String,
    pub max_steps: usize,
    pub context_window_size: usize,
    pub created_at: DateTime<Utc>,

    /// The system message context assembly prepends to every model
    /// request. A fresh session gets [`SYSTEM_PROMPT`]; a resumed one
    /// carries whatever the log captured (or, for logs predating that
    /// record, the same default).
    pub system_message: String,

    pub messages: Vec<Message>,
    pub summaries: Vec<SummaryBlock>,

    /// Workspace-relative paths read so far this session. A write or patch
    /// to a path not in this set (and that already exists) is rejected.
    pub read_paths: HashSet<String>,
    /// Bumped on every successful mutating tool call.
    pub workspace_version: u64,
    /// Signatures of low-value exploration calls (`list_files`,
    /// `search_workspace`, idle `run_shell`) already executed at the
    /// current `workspace_version`. Cleared whenever the version bumps, so
    /// the same call is allowed again once the workspace has actually
    /// changed.
    pub explored_signatures: HashSet<String>,

    pub interrupts: InterruptQueue<Interrupt>,
    pub oscillation: OscillationObserver,
}

impl Session {
    pub fn new(
        workspace: PathBuf,
        log_path: PathBuf,
        provider: Arc<dyn LLMProvider>,
        model: String,
        max_steps: usize,
        context_window_size: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace,
            log_path,
            provider,
            model,
            max_steps,
            context_window_size,
            created_at: Utc::now(),
            system_message: SYSTEM_PROMPT.to_string(),
            messages: Vec::new(),
            summaries: Vec::new(),
            read_paths: HashSet::new(),
            workspace_version: 0,
            explored_signatures: HashSet::new(),
            interrupts: InterruptQueue::new(),
            oscillation: OscillationObserver::new(),
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Number of messages already folded into a summary block and thus no
    /// longer replayed verbatim.
    pub fn compressed_count(&self) -> usize {
        self.summaries.iter().map(|s| s.to - s.from).sum()
    }

    pub fn mark_read(&mut self, relative_path: &str) {
        self.read_paths.insert(relative_path.to_string());
    }

    pub fn has_read(&self, relative_path: &str) -> bool {
        self.read_paths.contains(relative_path)
    }

    pub fn bump_workspace_version(&mut self) {
        self.workspace_version += 1;
        self.explored_signatures.clear();
    }

    /// Record that a low-value exploration signature ran at the current
    /// workspace version. Returns `true` if this is the first time it has
    /// run since the last mutation (the call should execute), `false` if
    /// it's a repeat (the call should be rejected without touching disk).
    pub fn mark_explored(&mut self, signature: &str) -> bool {
        self.explored_signatures.insert(signature.to_string())
    }
}
