//! Synchronous, subscription-ordered event bus.
//!
//! Every turn-engine milestone is published here as an [`AgentEvent`], and
//! every subscriber runs inline, in subscription order, before `publish`
//! returns. This is a deliberate departure from a channel-based bus: a
//! `tokio::broadcast` subscriber can miss events entirely once its queue
//! fills, which is fine for UI toasts but wrong for a session-log
//! subscriber that must see every message. A handler that panics is
//! isolated with `catch_unwind` so one broken subscriber can't take down
//! the turn that published the event, and can't stop the remaining
//! subscribers from running either.
//!
//! Subscribers that need to do real I/O (appending to a JSONL file,
//! running a lint check) must not block the publishing thread: they queue
//! the work onto their own background task instead of awaiting it inline.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ai::types::ToolCallDescriptor;

/// Every milestone the turn engine publishes over the course of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Start {
        session_id: Uuid,
        workspace: String,
        log_path: String,
        model: String,
    },
    SessionResume {
        session_id: Uuid,
        workspace: String,
        log_path: String,
        message_count: usize,
    },
    SessionEnd {
        session_id: Uuid,
    },
    Message {
        session_id: Uuid,
        role: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        tool_call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        tool_name: Option<String>,
        /// Structured tool calls carried by an assistant message, so the
        /// session log can replay it verbatim on resume rather than
        /// orphaning the tool-role messages that answer it.
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        tool_calls: Vec<ToolCallDescriptor>,
    },
    Summary {
        session_id: Uuid,
        from: usize,
        to: usize,
        content: String,
    },
    ContextTrim {
        session_id: Uuid,
        dropped: usize,
    },
    ModelRequestStart {
        session_id: Uuid,
        message_count: usize,
    },
    ModelResponse {
        session_id: Uuid,
        content: String,
        tool_call_count: usize,
    },
    ToolCall {
        session_id: Uuid,
        tool: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        call_id: Option<String>,
    },
    ToolResult {
        session_id: Uuid,
        tool: String,
        ok: bool,
        output: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        path: Option<String>,
    },
    OscillationObserve {
        session_id: Uuid,
        repeat_ratio: f64,
        novelty_ratio: f64,
        no_mutation_steps: u32,
        possible_oscillation: bool,
    },
    Final {
        session_id: Uuid,
        text: String,
    },
    MaxSteps {
        session_id: Uuid,
    },
}

impl AgentEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            AgentEvent::Start { session_id, .. }
            | AgentEvent::SessionResume { session_id, .. }
            | AgentEvent::SessionEnd { session_id }
            | AgentEvent::Message { session_id, .. }
            | AgentEvent::Summary { session_id, .. }
            | AgentEvent::ContextTrim { session_id, .. }
            | AgentEvent::ModelRequestStart { session_id, .. }
            | AgentEvent::ModelResponse { session_id, .. }
            | AgentEvent::ToolCall { session_id, .. }
            | AgentEvent::ToolResult { session_id, .. }
            | AgentEvent::OscillationObserve { session_id, .. }
            | AgentEvent::Final { session_id, .. }
            | AgentEvent::MaxSteps { session_id } => *session_id,
        }
    }
}

type Handler = Box<dyn Fn(&AgentEvent) + Send + Sync>;

/// Dispatches [`AgentEvent`]s to every subscriber, synchronously and in
/// the order they subscribed.
pub struct EventBus {
    handlers: Mutex<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

/// Returned by [`EventBus::subscribe`]; dropping it does nothing — call
/// [`EventBus::unsubscribe`] explicitly with the id it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register `handler`; it runs for every event published after this
    /// call, in the order subscribers were added.
    pub fn subscribe(
        &self,
        handler: impl Fn(&AgentEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().unwrap().push((id, Box::new(handler)));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.lock().unwrap().retain(|(hid, _)| *hid != id.0);
    }

    /// Dispatch `event` to every subscriber in order. A handler that
    /// panics is caught and logged; it does not stop the remaining
    /// handlers from running, and does not propagate to the caller.
    pub fn publish(&self, event: AgentEvent) {
        let handlers = self.handlers.lock().unwrap();
        for (id, handler) in handlers.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                tracing::error!(subscriber_id = id, "event subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
