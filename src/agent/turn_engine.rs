//! The agent turn state machine: provider call → parse → dispatch →
//! append → iterate, with sliding-window compression and oscillation
//! observation layered on top.
//!
//! One call to [`run_turn`] drives the conversation from a freshly
//! appended user message through as many tool-call steps as the model
//! asks for, stopping when it returns plain text, when `max_steps` is
//! reached, or when the turn errors out.

use std::collections::HashMap;

use serde_json::Value;

use crate::ai::types::{CompletionRequest, Message, MessageRole, ToolCallDescriptor, ToolDefinition};
use crate::agent::oscillation::OscillationObserver;
use crate::agent::tool_parser::parse_tool_calls;
use crate::agent::tools::execute_tool;
use crate::error::Result;
use crate::event_bus::{AgentEvent, EventBus};
use crate::security::ApprovalCallback;
use crate::session::model::Session;
use crate::workspace::Workspace;

/// The system message every freshly-created session carries. Published as
/// an `AgentEvent::Message` right after `Start` so the log and a resumed
/// session agree on what a session's system message looks like (spec
/// requires the log to record it, and a resume with none captured to
/// synthesize one).
pub const SYSTEM_PROMPT: &str = "You are a coding agent with access to a sandboxed workspace. \
Use the available tools to read, search, and modify files, and to run shell commands. \
Read a file before writing to it; pass create=true only when making a brand-new file. \
Make at most one mutating change per turn. When you are done, answer in plain text \
with no tool call.";

/// Read-only tools, for the oscillation observer's "no mutation" bookkeeping
/// and the turn engine's own per-step result cache (repeating the exact same
/// read inside one batch of calls returns the cached result rather than
/// re-executing it).
const READ_ONLY_TOOLS: &[&str] = &["read_file", "list_files", "search_workspace"];

/// Tools whose execution mutates the workspace (or might, in `run_shell`'s
/// case) — counted for the single-mutation-per-step batch check.
const MUTATING_TOOLS: &[&str] = &["write_file", "apply_patch", "run_shell"];

/// Low-value exploration calls get rejected outright — not just cached — the
/// second time the identical call runs at the same `workspace_version`.
/// `read_file` is excluded: re-reading a file you already read is normal
/// (and required before a second write to the same path), not exploration
/// churn.
fn is_low_value_exploration(name: &str, arguments: &Value) -> bool {
    match name {
        "list_files" | "search_workspace" => true,
        "run_shell" => arguments
            .get("command")
            .and_then(Value::as_str)
            .map(|c| {
                let c = c.trim();
                c == "ls" || c.starts_with("ls ") || c == "pwd" || c.starts_with("pwd ")
            })
            .unwrap_or(false),
        _ => false,
    }
}

pub fn tool_catalog() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read the full contents of a workspace-relative file.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write content to a workspace-relative file. The file must have been \
                read first if it already exists; pass create=true to make a new file."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                    "create": {"type": "boolean"}
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: "apply_patch".to_string(),
            description: "Replace a search string with a replacement string in a file that has \
                already been read."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "search": {"type": "string"},
                    "replace": {"type": "string"},
                    "replace_all": {"type": "boolean"}
                },
                "required": ["path", "search"]
            }),
        },
        ToolDefinition {
            name: "list_files".to_string(),
            description: "List the entries of a workspace-relative directory.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
            }),
        },
        ToolDefinition {
            name: "search_workspace".to_string(),
            description: "Case-insensitive substring search over file names and paths, capped \
                at 200 hits."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"query": {"type": "string"}, "path": {"type": "string"}},
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "run_shell".to_string(),
            description: "Run a shell command in a workspace-relative working directory. \
                Destructive commands require approval."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"command": {"type": "string"}, "cwd": {"type": "string"}},
                "required": ["command"]
            }),
        },
    ]
}

/// Assemble the message list sent to the provider: the system prompt, the
/// most recent 3 summary blocks, then the open (uncompressed) message
/// window with any leading orphaned `Tool` message trimmed off.
///
/// Returns the assembled context and how many leading messages were
/// trimmed (for the `context_trim` event).
fn assemble_context(session: &Session) -> (Vec<Message>, usize) {
    let mut context = vec![Message::system(session.system_message.clone())];

    let recent_summaries = if session.summaries.len() > 3 {
        &session.summaries[session.summaries.len() - 3..]
    } else {
        &session.summaries[..]
    };
    for block in recent_summaries {
        context.push(Message::system(format!(
            "[compressed summary of messages {}..{}] {}",
            block.from, block.to, block.content
        )));
    }

    let compressed_to = session.summaries.last().map(|s| s.to).unwrap_or(0);
    let len = session.messages.len();
    let window_start = compressed_to
        .max(len.saturating_sub(session.context_window_size))
        .min(len);
    let mut window: Vec<Message> = session.messages[window_start..].to_vec();

    let mut trimmed = 0;
    if matches!(window.first(), Some(m) if m.role == MessageRole::Tool) {
        window.remove(0);
        trimmed = 1;
    }

    context.extend(window);
    (context, trimmed)
}

/// Truncate `text` to ~180 chars and collapse it onto a single line, the
/// way every entry in a summary block is rendered.
fn one_line(text: &str) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(180).collect()
}

/// Fold the oldest `chunk` uncompressed messages into a new summary block.
///
/// The summary content is a deterministic, truncated concatenation of the
/// last three user intents, the last three assistant actions, and the last
/// five tool results seen in the folded range — no model call is made to
/// produce it.
fn compress_oldest(session: &mut Session, chunk: usize) {
    let from = session.summaries.last().map(|s| s.to).unwrap_or(0);
    let to = (from + chunk).min(session.messages.len());
    if to <= from {
        return;
    }

    let folded = &session.messages[from..to];
    let user_intents: Vec<&str> = folded
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .rev()
        .take(3)
        .map(|m| m.content.as_str())
        .collect();
    let assistant_actions: Vec<&str> = folded
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .rev()
        .take(3)
        .map(|m| m.content.as_str())
        .collect();
    let tool_results: Vec<&str> = folded
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .rev()
        .take(5)
        .map(|m| m.content.as_str())
        .collect();

    let mut content = String::new();
    for intent in user_intents.into_iter().rev() {
        content.push_str("user intent: ");
        content.push_str(&one_line(intent));
        content.push('\n');
    }
    for action in assistant_actions.into_iter().rev() {
        content.push_str("assistant action: ");
        content.push_str(&one_line(action));
        content.push('\n');
    }
    for result in tool_results.into_iter().rev() {
        content.push_str("tool result: ");
        content.push_str(&one_line(result));
        content.push('\n');
    }

    session.summaries.push(crate::session::model::SummaryBlock {
        created_at: chrono::Utc::now(),
        from,
        to,
        content,
    });
}

fn tool_call_signature(name: &str, arguments: &Value) -> String {
    let args_json = serde_json::to_string(arguments).unwrap_or_default();
    OscillationObserver::signature(name, &args_json)
}

/// One resolved tool call about to be dispatched: either structured
/// (native function calling) or fallback-parsed from text.
struct PendingCall {
    call_id: String,
    name: String,
    arguments: Value,
}

fn resolve_calls(
    tool_calls: &[ToolCallDescriptor],
    content: &str,
    step: usize,
) -> Vec<PendingCall> {
    if !tool_calls.is_empty() {
        return tool_calls
            .iter()
            .map(|c| PendingCall {
                call_id: c.id.clone(),
                name: c.name.clone(),
                arguments: c.arguments.clone(),
            })
            .collect();
    }
    parse_tool_calls(content)
        .into_iter()
        .enumerate()
        .map(|(i, c)| PendingCall {
            call_id: format!("fallback-{step}-{i}"),
            name: c.name,
            arguments: c.arguments,
        })
        .collect()
}

/// Drive one full turn: append the user's message, then loop model calls
/// and tool dispatch until the model answers in plain text or `max_steps`
/// is reached.
pub async fn run_turn(
    session: &mut Session,
    user_text: &str,
    workspace: &Workspace,
    event_bus: &EventBus,
    approval: &dyn ApprovalCallback,
) -> Result<String> {
    let session_id = session.id;

    session.messages.push(Message::user(user_text));
    event_bus.publish(AgentEvent::Message {
        session_id,
        role: "user".to_string(),
        content: user_text.to_string(),
        tool_call_id: None,
        tool_name: None,
        tool_calls: Vec::new(),
    });

    for interrupt in session.interrupts.drain() {
        session.messages.push(Message::tool(
            interrupt.detail.clone(),
            format!("interrupt-{session_id}"),
            "async_check".to_string(),
        ));
        event_bus.publish(AgentEvent::Message {
            session_id,
            role: "tool".to_string(),
            content: interrupt.detail,
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
        });
    }

    const COMPRESSION_TRIGGER: usize = 40;
    const COMPRESSION_CHUNK: usize = 20;
    let trigger = COMPRESSION_TRIGGER;
    let chunk = COMPRESSION_CHUNK;

    for step in 0..session.max_steps {
        let uncompressed = session.messages.len() - session.summaries.last().map(|s| s.to).unwrap_or(0);
        if uncompressed >= trigger {
            let from = session.summaries.last().map(|s| s.to).unwrap_or(0);
            compress_oldest(session, chunk);
            if let Some(block) = session.summaries.last() {
                event_bus.publish(AgentEvent::Summary {
                    session_id,
                    from: block.from,
                    to: block.to,
                    content: block.content.clone(),
                });
            }
            let _ = from;
        }

        let (context, trimmed) = assemble_context(session);
        if trimmed > 0 {
            event_bus.publish(AgentEvent::ContextTrim { session_id, dropped: trimmed });
        }

        event_bus.publish(AgentEvent::ModelRequestStart {
            session_id,
            message_count: context.len(),
        });

        let request = CompletionRequest::new(session.model.clone(), context).with_tools(tool_catalog());
        // Provider-transient failures are recovered here, not propagated: a
        // conforming `LLMProvider::complete` already exhausts its own
        // retries/fallbacks and returns a safe fallback `Ok`, but we treat a
        // stray `Err` the same way so the turn always closes cleanly.
        let response = match session.provider.complete(request).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "provider call failed; using safe fallback");
                crate::ai::provider::safe_fallback_response(session.model.clone())
            }
        };

        let content = if response.content.trim().is_empty() && response.tool_calls.is_empty() {
            "(no response)".to_string()
        } else {
            response.content.clone()
        };

        event_bus.publish(AgentEvent::ModelResponse {
            session_id,
            content: content.clone(),
            tool_call_count: response.tool_calls.len(),
        });

        session.messages.push(Message::assistant_with_tool_calls(
            content.clone(),
            response.tool_calls.clone(),
        ));
        event_bus.publish(AgentEvent::Message {
            session_id,
            role: "assistant".to_string(),
            content: content.clone(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: response.tool_calls.clone(),
        });

        let calls = resolve_calls(&response.tool_calls, &response.content, step);
        if calls.is_empty() {
            event_bus.publish(AgentEvent::Final { session_id, text: content.clone() });
            return Ok(content);
        }

        let mutation_count = calls.iter().filter(|c| MUTATING_TOOLS.contains(&c.name.as_str())).count();
        if mutation_count > 1 {
            let note = "Batch rejected: a single response may make at most one mutating \
                tool call; none of this step's tool calls were executed."
                .to_string();
            event_bus.publish(AgentEvent::ToolResult {
                session_id,
                tool: "batch".to_string(),
                ok: false,
                output: note.clone(),
                path: None,
            });
            session.messages.push(Message::tool(note, format!("batch-{step}"), "batch".to_string()));
            event_bus.publish(AgentEvent::Message {
                session_id,
                role: "tool".to_string(),
                content: String::new(),
                tool_call_id: Some(format!("batch-{step}")),
                tool_name: Some("batch".to_string()),
                tool_calls: Vec::new(),
            });
            continue;
        }

        let mut mutated_this_step = false;
        let mut cache: HashMap<String, (bool, String)> = HashMap::new();

        for call in calls {
            let signature = tool_call_signature(&call.name, &call.arguments);
            event_bus.publish(AgentEvent::ToolCall {
                session_id,
                tool: call.name.clone(),
                input: call.arguments.clone(),
                call_id: Some(call.call_id.clone()),
            });

            let (ok, output, path, mutated) = if is_low_value_exploration(&call.name, &call.arguments) {
                let exploration_signature =
                    format!("{}:{signature}", session.workspace_version);
                if !session.mark_explored(&exploration_signature) {
                    (
                        false,
                        format!(
                            "rejected: '{}' already ran with identical arguments since the last \
                             workspace change; nothing new to learn from repeating it"
                            , call.name
                        ),
                        None,
                        false,
                    )
                } else {
                    let outcome = execute_tool(
                        &call.name,
                        &call.arguments,
                        session,
                        workspace,
                        approval,
                        mutated_this_step,
                    )
                    .await;
                    (outcome.ok, outcome.output, outcome.path, outcome.mutated)
                }
            } else if READ_ONLY_TOOLS.contains(&call.name.as_str()) {
                if let Some((cached_ok, cached_output)) = cache.get(&signature) {
                    (*cached_ok, cached_output.clone(), None, false)
                } else {
                    let outcome = execute_tool(
                        &call.name,
                        &call.arguments,
                        session,
                        workspace,
                        approval,
                        mutated_this_step,
                    )
                    .await;
                    cache.insert(signature.clone(), (outcome.ok, outcome.output.clone()));
                    (outcome.ok, outcome.output, outcome.path, outcome.mutated)
                }
            } else {
                let outcome = execute_tool(
                    &call.name,
                    &call.arguments,
                    session,
                    workspace,
                    approval,
                    mutated_this_step,
                )
                .await;
                (outcome.ok, outcome.output, outcome.path, outcome.mutated)
            };

            if mutated {
                mutated_this_step = true;
            }

            event_bus.publish(AgentEvent::ToolResult {
                session_id,
                tool: call.name.clone(),
                ok,
                output: output.clone(),
                path: path.clone(),
            });

            let report = session.oscillation.observe(signature, &output, mutated);
            event_bus.publish(AgentEvent::OscillationObserve {
                session_id,
                repeat_ratio: report.repeat_ratio,
                novelty_ratio: report.novelty_ratio,
                no_mutation_steps: report.no_mutation_steps,
                possible_oscillation: report.possible_oscillation,
            });

            session
                .messages
                .push(Message::tool(output, call.call_id.clone(), call.name.clone()));
            event_bus.publish(AgentEvent::Message {
                session_id,
                role: "tool".to_string(),
                content: String::new(),
                tool_call_id: Some(call.call_id),
                tool_name: Some(call.name),
                tool_calls: Vec::new(),
            });
        }
    }

    event_bus.publish(AgentEvent::MaxSteps { session_id });
    Ok("max steps reached without a final answer".to_string())
}
