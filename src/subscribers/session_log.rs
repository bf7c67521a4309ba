//! Persists the conversation to an append-only JSONL log.
//!
//! Each session gets its own background task and channel; `publish`
//! itself never touches disk — it just forwards the record onto the
//! channel, so a slow filesystem can't stall the turn engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::event_bus::{AgentEvent, EventBus};
use crate::session::persistence::{append_record, PersistedRecord};

struct Writer {
    sender: mpsc::UnboundedSender<PersistedRecord>,
    handle: JoinHandle<()>,
}

/// Subscribes to the event bus and appends every session's conversation
/// to `<home>/sessions/<id>.jsonl`.
pub struct SessionLogSubscriber {
    writers: Mutex<HashMap<Uuid, Writer>>,
}

impl SessionLogSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { writers: Mutex::new(HashMap::new()) })
    }

    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let this = self.clone();
        bus.subscribe(move |event| this.handle(event));
    }

    fn handle(&self, event: &AgentEvent) {
        match event {
            AgentEvent::Start { session_id, workspace, log_path, model } => {
                self.spawn_writer(*session_id, PathBuf::from(log_path));
                self.enqueue(
                    *session_id,
                    PersistedRecord::SessionStart {
                        session_id: *session_id,
                        workspace: workspace.clone(),
                        model: model.clone(),
                        started_at: chrono::Utc::now(),
                    },
                );
            }
            AgentEvent::SessionResume { session_id, log_path, .. } => {
                // A resumed/switched-to session never gets a `Start` event
                // in this process, so the writer has to be spawned here too
                // — `spawn_writer` is a no-op if one already exists.
                self.spawn_writer(*session_id, PathBuf::from(log_path));
                self.enqueue(
                    *session_id,
                    PersistedRecord::SessionResume { resumed_at: chrono::Utc::now() },
                );
            }
            AgentEvent::Message { session_id, role, content, tool_call_id, tool_name, tool_calls } => {
                self.enqueue(
                    *session_id,
                    PersistedRecord::Message {
                        role: role.clone(),
                        content: content.clone(),
                        tool_call_id: tool_call_id.clone(),
                        tool_name: tool_name.clone(),
                        tool_calls: tool_calls.clone(),
                    },
                );
            }
            AgentEvent::Summary { session_id, from, to, content } => {
                self.enqueue(
                    *session_id,
                    PersistedRecord::Summary { from: *from, to: *to, content: content.clone() },
                );
            }
            AgentEvent::SessionEnd { session_id } => {
                self.enqueue(
                    *session_id,
                    PersistedRecord::SessionEnd { ended_at: chrono::Utc::now() },
                );
            }
            _ => {}
        }
    }

    fn spawn_writer(&self, session_id: Uuid, log_path: PathBuf) {
        let mut writers = self.writers.lock().unwrap();
        if writers.contains_key(&session_id) {
            return;
        }
        let (sender, mut receiver) = mpsc::unbounded_channel::<PersistedRecord>();
        let handle = tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                let path = log_path.clone();
                let result =
                    tokio::task::spawn_blocking(move || append_record(&path, &record)).await;
                if let Ok(Err(e)) = result {
                    tracing::error!(error = %e, "failed to append session log record");
                }
            }
        });
        writers.insert(session_id, Writer { sender, handle });
    }

    fn enqueue(&self, session_id: Uuid, record: PersistedRecord) {
        let writers = self.writers.lock().unwrap();
        if let Some(writer) = writers.get(&session_id) {
            let _ = writer.sender.send(record);
        }
    }

    /// Close the channel for `session_id` and wait for every queued write
    /// to land on disk before returning.
    pub async fn flush(&self, session_id: Uuid) {
        let writer = self.writers.lock().unwrap().remove(&session_id);
        if let Some(writer) = writer {
            drop(writer.sender);
            let _ = writer.handle.await;
        }
    }
}

impl Default for SessionLogSubscriber {
    fn default() -> Self {
        Self { writers: Mutex::new(HashMap::new()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn start_then_message_then_flush_persists_to_disk() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("s.jsonl");
        let bus = EventBus::new();
        let subscriber = SessionLogSubscriber::new();
        subscriber.attach(&bus);

        let session_id = Uuid::new_v4();
        bus.publish(AgentEvent::Start {
            session_id,
            workspace: "/ws".to_string(),
            log_path: log_path.to_string_lossy().into_owned(),
            model: "mock".to_string(),
        });
        bus.publish(AgentEvent::Message {
            session_id,
            role: "user".to_string(),
            content: "hello".to_string(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
        });

        subscriber.flush(session_id).await;

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("session_start"));
        assert!(content.contains("hello"));
    }

    #[tokio::test]
    async fn events_for_unknown_session_are_dropped_silently() {
        let bus = EventBus::new();
        let subscriber = SessionLogSubscriber::new();
        subscriber.attach(&bus);
        // No Start event published first — this must not panic.
        bus.publish(AgentEvent::Message {
            session_id: Uuid::new_v4(),
            role: "user".to_string(),
            content: "orphan".to_string(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
        });
    }

    #[tokio::test]
    async fn assistant_tool_calls_survive_a_log_round_trip() {
        use crate::ai::types::ToolCallDescriptor;
        use crate::session::persistence::resume;

        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("s.jsonl");
        let bus = EventBus::new();
        let subscriber = SessionLogSubscriber::new();
        subscriber.attach(&bus);

        let session_id = Uuid::new_v4();
        let calls = vec![ToolCallDescriptor {
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            arguments: serde_json::json!({"path": "src/lib.rs"}),
        }];

        bus.publish(AgentEvent::Start {
            session_id,
            workspace: "/ws".to_string(),
            log_path: log_path.to_string_lossy().into_owned(),
            model: "mock".to_string(),
        });
        bus.publish(AgentEvent::Message {
            session_id,
            role: "assistant".to_string(),
            content: String::new(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: calls.clone(),
        });

        subscriber.flush(session_id).await;

        let replayed = resume(&log_path).unwrap();
        let assistant_msg = replayed
            .messages
            .iter()
            .find(|m| m.role == crate::ai::types::MessageRole::Assistant)
            .expect("assistant message persisted");
        assert_eq!(assistant_msg.tool_calls, calls);
    }

    #[tokio::test]
    async fn system_message_right_after_start_is_captured_on_resume() {
        use crate::session::persistence::resume;

        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("s.jsonl");
        let bus = EventBus::new();
        let subscriber = SessionLogSubscriber::new();
        subscriber.attach(&bus);

        let session_id = Uuid::new_v4();
        bus.publish(AgentEvent::Start {
            session_id,
            workspace: "/ws".to_string(),
            log_path: log_path.to_string_lossy().into_owned(),
            model: "mock".to_string(),
        });
        bus.publish(AgentEvent::Message {
            session_id,
            role: "system".to_string(),
            content: "you are a coding agent".to_string(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
        });

        subscriber.flush(session_id).await;

        let content = std::fs::read_to_string(&log_path).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().contains("session_start"));
        assert!(lines.next().unwrap().contains("you are a coding agent"));

        let replayed = resume(&log_path).unwrap();
        assert_eq!(replayed.system_message, "you are a coding agent");
    }

    #[tokio::test]
    async fn session_resume_without_a_prior_start_still_spawns_a_writer() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("s.jsonl");
        std::fs::write(&log_path, "").unwrap();
        let bus = EventBus::new();
        let subscriber = SessionLogSubscriber::new();
        subscriber.attach(&bus);

        // A fresh process resuming/switching to an existing session only
        // ever sees `SessionResume`, never `Start` — the writer must come
        // up here too or every record after this point is dropped.
        let session_id = Uuid::new_v4();
        bus.publish(AgentEvent::SessionResume {
            session_id,
            workspace: "/ws".to_string(),
            log_path: log_path.to_string_lossy().into_owned(),
            message_count: 1,
        });
        bus.publish(AgentEvent::Message {
            session_id,
            role: "user".to_string(),
            content: "still going".to_string(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
        });

        subscriber.flush(session_id).await;

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("session_resume"));
        assert!(content.contains("still going"));
    }
}
