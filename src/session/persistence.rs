//! JSONL session logs: one line per record, append-only, human-diffable.
//!
//! There is no database here — a session's entire history lives in its own
//! `<home>/sessions/<id>.jsonl` file, one JSON object per line. Resuming a
//! session means replaying that file back into a [`Session`]; listing
//! sessions for a workspace means reading just the first line (the
//! `session_start` record) of every file under the sessions directory.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::turn_engine::SYSTEM_PROMPT;
use crate::ai::types::{Message, MessageRole, ToolCallDescriptor};
use crate::error::{AgentError, Result};
use crate::session::model::SummaryBlock;

/// One line of a session's JSONL log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PersistedRecord {
    SessionStart {
        session_id: Uuid,
        workspace: String,
        model: String,
        started_at: DateTime<Utc>,
    },
    SessionResume {
        resumed_at: DateTime<Utc>,
    },
    Message {
        role: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        tool_call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        tool_calls: Vec<ToolCallDescriptor>,
    },
    Summary {
        from: usize,
        to: usize,
        content: String,
    },
    SessionEnd {
        ended_at: DateTime<Utc>,
    },
}

/// Append one record as a single JSON line. Opens the file in append mode
/// so concurrent writers from different processes never truncate it.
pub fn append_record(log_path: &Path, record: &PersistedRecord) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AgentError::Workspace(format!("failed to create sessions dir: {e}")))?;
    }
    let line = serde_json::to_string(record)
        .map_err(|e| AgentError::Replay(format!("failed to serialise record: {e}")))?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| AgentError::Workspace(format!("failed to open session log: {e}")))?;
    writeln!(file, "{line}")
        .map_err(|e| AgentError::Workspace(format!("failed to append to session log: {e}")))
}

/// Read and parse every record in a session log, in order. A line that
/// fails to parse (malformed JSON, missing fields) is skipped and parsing
/// continues with the next line — a single corrupt record does not abort
/// an otherwise-readable log.
pub fn read_records(log_path: &Path) -> Result<Vec<PersistedRecord>> {
    let content = std::fs::read_to_string(log_path)
        .map_err(|e| AgentError::Workspace(format!("failed to read session log: {e}")))?;

    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "skipping corrupt session log line");
                None
            }
        })
        .collect())
}

/// Everything replayed out of a log file needed to reconstruct in-memory
/// session state.
pub struct ReplayedSession {
    pub session_id: Uuid,
    pub workspace: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    /// The non-system message list — summary block indices are defined
    /// against this list, so captured `system` records are kept out of it
    /// (see [`Self::system_message`]) rather than interleaved.
    pub messages: Vec<Message>,
    pub summaries: Vec<SummaryBlock>,
    /// The system message this session was run with: the first `system`
    /// record captured in the log, or [`SYSTEM_PROMPT`] when the log
    /// predates that record.
    pub system_message: String,
}

/// Replay `log_path` into [`ReplayedSession`]. The first record must be a
/// `session_start`; anything else is a resume/malformed-log error.
pub fn resume(log_path: &Path) -> Result<ReplayedSession> {
    let records = read_records(log_path)?;
    let mut iter = records.into_iter();

    let (session_id, workspace, model, started_at) = match iter.next() {
        Some(PersistedRecord::SessionStart {
            session_id,
            workspace,
            model,
            started_at,
        }) => (session_id, workspace, model, started_at),
        _ => {
            return Err(AgentError::Resume(format!(
                "session log '{}' does not begin with a session_start record",
                log_path.display()
            )))
        }
    };

    let mut messages = Vec::new();
    let mut summaries = Vec::new();
    let mut system_message: Option<String> = None;

    for record in iter {
        match record {
            PersistedRecord::Message {
                role,
                content,
                tool_call_id,
                tool_name,
                tool_calls,
            } => {
                let role = match role.as_str() {
                    "system" => MessageRole::System,
                    "user" => MessageRole::User,
                    "assistant" => MessageRole::Assistant,
                    "tool" => MessageRole::Tool,
                    other => {
                        return Err(AgentError::Replay(format!("unknown message role '{other}'")))
                    }
                };
                // The system message is replayed out-of-band via
                // `system_message` — summary block indices are defined
                // against the non-system list, so it never goes into
                // `messages`.
                if role == MessageRole::System {
                    if system_message.is_none() {
                        system_message = Some(content);
                    }
                    continue;
                }
                messages.push(Message {
                    role,
                    content,
                    tool_call_id,
                    tool_name,
                    tool_calls,
                });
            }
            PersistedRecord::Summary { from, to, content } => {
                summaries.push(SummaryBlock {
                    created_at: Utc::now(),
                    from,
                    to,
                    content,
                });
            }
            PersistedRecord::SessionStart { .. } => {
                return Err(AgentError::Replay(
                    "duplicate session_start record in log".to_string(),
                ))
            }
            PersistedRecord::SessionResume { .. } | PersistedRecord::SessionEnd { .. } => {}
        }
    }

    // Older logs predate the system-message record; fall back to the same
    // default a freshly created session gets rather than leaving this
    // session with none at all.
    let system_message = system_message.unwrap_or_else(|| SYSTEM_PROMPT.to_string());

    Ok(ReplayedSession {
        session_id,
        workspace,
        model,
        started_at,
        messages,
        summaries,
        system_message,
    })
}

/// Metadata about a persisted session, without loading its full history.
#[derive(Debug, Clone)]
pub struct PersistedSessionSummary {
    pub session_id: Uuid,
    pub log_path: PathBuf,
    pub workspace: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    /// Timestamp of the most recent `session_resume` or `session_end`
    /// record in the log. `None` when the session has never been resumed
    /// or ended, in which case callers fall back to `started_at`.
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Number of `message` records replayed from the log.
    pub message_count: usize,
}

impl PersistedSessionSummary {
    /// `lastUpdatedAt ?? startedAt`, the key this summary sorts by.
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.last_updated_at.unwrap_or(self.started_at)
    }
}

/// Derive a [`PersistedSessionSummary`] by replaying every record in
/// `path`, without retaining message content.
fn summarize_log(path: &Path) -> Option<PersistedSessionSummary> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let first: PersistedRecord = serde_json::from_str(lines.next()?).ok()?;
    let (session_id, workspace, model, started_at) = match first {
        PersistedRecord::SessionStart { session_id, workspace, model, started_at } => {
            (session_id, workspace, model, started_at)
        }
        _ => return None,
    };

    let mut message_count = 0;
    let mut last_updated_at = None;
    for line in lines {
        match serde_json::from_str::<PersistedRecord>(line) {
            Ok(PersistedRecord::Message { .. }) => message_count += 1,
            Ok(PersistedRecord::SessionResume { resumed_at }) => last_updated_at = Some(resumed_at),
            Ok(PersistedRecord::SessionEnd { ended_at }) => last_updated_at = Some(ended_at),
            _ => {}
        }
    }

    Some(PersistedSessionSummary {
        session_id,
        log_path: path.to_path_buf(),
        workspace,
        model,
        started_at,
        last_updated_at,
        message_count,
    })
}

/// List every session whose log lives under `sessions_dir` and whose
/// `session_start.workspace` matches `workspace`, newest first by
/// `lastUpdatedAt ?? startedAt`.
pub fn list_persisted_sessions_for_workspace(
    sessions_dir: &Path,
    workspace: &str,
) -> Result<Vec<PersistedSessionSummary>> {
    let mut summaries = Vec::new();

    let read_dir = match std::fs::read_dir(sessions_dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summaries),
        Err(e) => {
            return Err(AgentError::Workspace(format!(
                "failed to list sessions directory: {e}"
            )))
        }
    };

    for entry in read_dir {
        let entry =
            entry.map_err(|e| AgentError::Workspace(format!("failed to read dir entry: {e}")))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }

        let Some(summary) = summarize_log(&path) else { continue };
        if summary.workspace == workspace {
            summaries.push(summary);
        }
    }

    summaries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    Ok(summaries)
}

/// Resolve a `/use` selector against a list of summaries (newest first):
/// `"latest"`, a 1-based index into the list, or a session id (full or a
/// unique prefix).
pub fn pick_session<'a>(
    summaries: &'a [PersistedSessionSummary],
    selector: &str,
) -> Option<&'a PersistedSessionSummary> {
    if selector.eq_ignore_ascii_case("latest") {
        return summaries.first();
    }
    if let Ok(index) = selector.parse::<usize>() {
        if index >= 1 {
            return summaries.get(index - 1);
        }
    }
    let matches: Vec<&PersistedSessionSummary> = summaries
        .iter()
        .filter(|s| s.session_id.to_string().starts_with(selector))
        .collect();
    if matches.len() == 1 {
        Some(matches[0])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_log(dir: &TempDir, name: &str, records: &[PersistedRecord]) -> PathBuf {
        let path = dir.path().join(name);
        for record in records {
            append_record(&path, record).unwrap();
        }
        path
    }

    #[test]
    fn append_and_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let path = write_log(
            &dir,
            "s.jsonl",
            &[
                PersistedRecord::SessionStart {
                    session_id: id,
                    workspace: "/ws".to_string(),
                    model: "mock".to_string(),
                    started_at: Utc::now(),
                },
                PersistedRecord::Message {
                    role: "user".to_string(),
                    content: "hi".to_string(),
                    tool_call_id: None,
                    tool_name: None,
                    tool_calls: Vec::new(),
                },
            ],
        );
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn resume_reconstructs_messages_and_summaries() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let path = write_log(
            &dir,
            "s.jsonl",
            &[
                PersistedRecord::SessionStart {
                    session_id: id,
                    workspace: "/ws".to_string(),
                    model: "mock".to_string(),
                    started_at: Utc::now(),
                },
                PersistedRecord::Message {
                    role: "user".to_string(),
                    content: "hi".to_string(),
                    tool_call_id: None,
                    tool_name: None,
                    tool_calls: Vec::new(),
                },
                PersistedRecord::Summary {
                    from: 0,
                    to: 1,
                    content: "summary".to_string(),
                },
            ],
        );

        let replayed = resume(&path).unwrap();
        assert_eq!(replayed.session_id, id);
        assert_eq!(replayed.messages.len(), 1);
        assert_eq!(replayed.messages[0].content, "hi");
        assert_eq!(replayed.summaries.len(), 1);
        // The log carries no system record, so resume falls back to the
        // same default a freshly created session gets.
        assert_eq!(replayed.system_message, crate::agent::turn_engine::SYSTEM_PROMPT);
    }

    #[test]
    fn resume_uses_the_captured_system_message_and_keeps_it_out_of_the_non_system_list() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let path = write_log(
            &dir,
            "s.jsonl",
            &[
                PersistedRecord::SessionStart {
                    session_id: id,
                    workspace: "/ws".to_string(),
                    model: "mock".to_string(),
                    started_at: Utc::now(),
                },
                PersistedRecord::Message {
                    role: "system".to_string(),
                    content: "captured system prompt".to_string(),
                    tool_call_id: None,
                    tool_name: None,
                    tool_calls: Vec::new(),
                },
                PersistedRecord::Message {
                    role: "user".to_string(),
                    content: "hi".to_string(),
                    tool_call_id: None,
                    tool_name: None,
                    tool_calls: Vec::new(),
                },
            ],
        );

        let replayed = resume(&path).unwrap();
        assert_eq!(replayed.system_message, "captured system prompt");
        assert_eq!(replayed.messages.len(), 1);
        assert_eq!(replayed.messages[0].content, "hi");
    }

    #[test]
    fn resume_without_session_start_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_log(
            &dir,
            "s.jsonl",
            &[PersistedRecord::Message {
                role: "user".to_string(),
                content: "hi".to_string(),
                tool_call_id: None,
                tool_name: None,
                tool_calls: Vec::new(),
            }],
        );
        assert!(resume(&path).is_err());
    }

    #[test]
    fn list_sessions_filters_by_workspace() {
        let dir = TempDir::new().unwrap();
        write_log(
            &dir,
            "a.jsonl",
            &[PersistedRecord::SessionStart {
                session_id: Uuid::new_v4(),
                workspace: "/ws1".to_string(),
                model: "mock".to_string(),
                started_at: Utc::now(),
            }],
        );
        write_log(
            &dir,
            "b.jsonl",
            &[PersistedRecord::SessionStart {
                session_id: Uuid::new_v4(),
                workspace: "/ws2".to_string(),
                model: "mock".to_string(),
                started_at: Utc::now(),
            }],
        );

        let sessions = list_persisted_sessions_for_workspace(dir.path(), "/ws1").unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].workspace, "/ws1");
    }

    #[test]
    fn summary_reports_message_count_and_last_updated_at() {
        let dir = TempDir::new().unwrap();
        let path = write_log(
            &dir,
            "s.jsonl",
            &[
                PersistedRecord::SessionStart {
                    session_id: Uuid::new_v4(),
                    workspace: "/ws".to_string(),
                    model: "mock".to_string(),
                    started_at: Utc::now(),
                },
                PersistedRecord::Message {
                    role: "user".to_string(),
                    content: "hi".to_string(),
                    tool_call_id: None,
                    tool_name: None,
                    tool_calls: Vec::new(),
                },
                PersistedRecord::Message {
                    role: "assistant".to_string(),
                    content: "hello".to_string(),
                    tool_call_id: None,
                    tool_name: None,
                    tool_calls: Vec::new(),
                },
                PersistedRecord::SessionEnd { ended_at: Utc::now() },
            ],
        );

        let summaries = list_persisted_sessions_for_workspace(dir.path(), "/ws").unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].message_count, 2);
        assert!(summaries[0].last_updated_at.is_some());
        let _ = path;
    }

    #[test]
    fn list_sessions_missing_dir_returns_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let sessions = list_persisted_sessions_for_workspace(&missing, "/ws").unwrap();
        assert!(sessions.is_empty());
    }

    #[test]
    fn pick_session_by_latest_index_and_prefix() {
        let id = Uuid::new_v4();
        let summaries = vec![PersistedSessionSummary {
            session_id: id,
            log_path: PathBuf::from("s.jsonl"),
            workspace: "/ws".to_string(),
            model: "mock".to_string(),
            started_at: Utc::now(),
            last_updated_at: None,
            message_count: 0,
        }];

        assert!(pick_session(&summaries, "latest").is_some());
        assert!(pick_session(&summaries, "1").is_some());
        let prefix = &id.to_string()[..8];
        assert!(pick_session(&summaries, prefix).is_some());
        assert!(pick_session(&summaries, "nonexistent").is_none());
    }
}
