//! The fixed tool catalog the turn engine dispatches against, and the
//! read-before-write / create-guard safety rails that gate mutation.
//!
//! There is no plugin registry here — six tools, not dynamically
//! discoverable, matching the catalog offered to the model in its system
//! prompt. Each tool's *shape* (name, argument schema) is owned by
//! [`crate::agent::turn_engine`]; this module only owns what happens when
//! a call for one of them comes back from the parser.

use serde_json::Value;

use crate::security::{validate_shell_command, ApprovalCallback};
use crate::session::model::Session;
use crate::workspace::Workspace;

/// Outcome of executing one tool call.
pub struct ToolOutcome {
    pub ok: bool,
    pub output: String,
    /// Whether this call changed workspace state. Read-only tools never
    /// set this; a rejected mutation doesn't either.
    pub mutated: bool,
    /// Workspace-relative path touched, for tools that have one — used by
    /// the async-check subscriber to know what to lint.
    pub path: Option<String>,
}

impl ToolOutcome {
    fn ok(output: impl Into<String>) -> Self {
        Self { ok: true, output: output.into(), mutated: false, path: None }
    }

    fn mutated(output: impl Into<String>, path: impl Into<String>) -> Self {
        Self { ok: true, output: output.into(), mutated: true, path: Some(path.into()) }
    }

    fn err(output: impl Into<String>) -> Self {
        Self { ok: false, output: output.into(), mutated: false, path: None }
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing required argument '{key}'"))
}

/// Execute a single tool call against `session`'s workspace.
///
/// `already_mutated_this_step` enforces single-mutation-per-step: when
/// true, any tool that would mutate the workspace is rejected outright
/// without touching disk, regardless of its own rails.
pub async fn execute_tool(
    tool_name: &str,
    arguments: &Value,
    session: &mut Session,
    workspace: &Workspace,
    approval: &dyn ApprovalCallback,
    already_mutated_this_step: bool,
) -> ToolOutcome {
    match tool_name {
        "read_file" => read_file(arguments, session, workspace).await,
        "write_file" => {
            if already_mutated_this_step {
                return ToolOutcome::err(
                    "rejected: only one mutating tool call is allowed per step",
                );
            }
            write_file(arguments, session, workspace).await
        }
        "apply_patch" => {
            if already_mutated_this_step {
                return ToolOutcome::err(
                    "rejected: only one mutating tool call is allowed per step",
                );
            }
            apply_patch(arguments, session, workspace).await
        }
        "list_files" => list_files(arguments, workspace).await,
        "search_workspace" => search_workspace(arguments, workspace).await,
        "run_shell" => {
            if already_mutated_this_step {
                return ToolOutcome::err(
                    "rejected: only one mutating tool call is allowed per step",
                );
            }
            run_shell(arguments, session, workspace, approval).await
        }
        other => ToolOutcome::err(format!("unknown tool '{other}'")),
    }
}

async fn read_file(args: &Value, session: &mut Session, workspace: &Workspace) -> ToolOutcome {
    let path = match required_str(args, "path") {
        Ok(p) => p,
        Err(e) => return ToolOutcome::err(e),
    };
    match workspace.read_text(path).await {
        Ok(content) => {
            session.mark_read(path);
            ToolOutcome::ok(content)
        }
        Err(e) => ToolOutcome::err(e.to_string()),
    }
}

/// Tool-call JSON can decode a model-written `\r` escape into a literal
/// carriage-return byte, and some models emit a bare `\r` with no paired
/// `\n` at all. Either way a stray CR surviving into the file is never
/// what's wanted: fold `\r\n` and lone `\r` down to `\n` before the content
/// ever touches disk.
fn normalize_write_content(content: &str) -> String {
    if !content.contains('\r') {
        return content.to_string();
    }
    let mut normalized = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            normalized.push('\n');
        } else {
            normalized.push(c);
        }
    }
    normalized
}

async fn write_file(args: &Value, session: &mut Session, workspace: &Workspace) -> ToolOutcome {
    let path = match required_str(args, "path") {
        Ok(p) => p,
        Err(e) => return ToolOutcome::err(e),
    };
    let content = match required_str(args, "content") {
        Ok(c) => c,
        Err(e) => return ToolOutcome::err(e),
    };
    let content = normalize_write_content(content);
    let create = args.get("create").and_then(Value::as_bool).unwrap_or(false);

    let exists = match workspace.exists(path).await {
        Ok(e) => e,
        Err(e) => return ToolOutcome::err(e.to_string()),
    };

    if !exists && !create {
        return ToolOutcome::err(format!(
            "'{path}' does not exist; pass create=true to create a new file"
        ));
    }
    if exists && !session.has_read(path) {
        return ToolOutcome::err(format!(
            "'{path}' must be read_file first before it can be overwritten"
        ));
    }

    match workspace.write_text(path, &content).await {
        Ok(()) => {
            session.mark_read(path);
            session.bump_workspace_version();
            ToolOutcome::mutated(format!("wrote {} bytes to '{path}'", content.len()), path)
        }
        Err(e) => ToolOutcome::err(e.to_string()),
    }
}

async fn apply_patch(args: &Value, session: &mut Session, workspace: &Workspace) -> ToolOutcome {
    let path = match required_str(args, "path") {
        Ok(p) => p,
        Err(e) => return ToolOutcome::err(e),
    };
    let search = match required_str(args, "search") {
        Ok(s) => s,
        Err(e) => return ToolOutcome::err(e),
    };
    let replace = args.get("replace").and_then(Value::as_str).unwrap_or("");
    let replace_all = args.get("replace_all").and_then(Value::as_bool).unwrap_or(false);

    if !session.has_read(path) {
        return ToolOutcome::err(format!("'{path}' must be read before it can be patched"));
    }

    match workspace.apply_patch(path, search, replace, replace_all).await {
        Ok(_patched) => {
            session.bump_workspace_version();
            ToolOutcome::mutated(format!("patched '{path}'"), path)
        }
        Err(e) => ToolOutcome::err(e.to_string()),
    }
}

async fn list_files(args: &Value, workspace: &Workspace) -> ToolOutcome {
    let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
    match workspace.list_dir(path).await {
        Ok(entries) => {
            let listing = entries
                .iter()
                .map(|e| if e.is_dir { format!("{}/", e.name) } else { e.name.clone() })
                .collect::<Vec<_>>()
                .join("\n");
            ToolOutcome::ok(listing)
        }
        Err(e) => ToolOutcome::err(e.to_string()),
    }
}

async fn search_workspace(args: &Value, workspace: &Workspace) -> ToolOutcome {
    let query = match required_str(args, "query") {
        Ok(q) => q,
        Err(e) => return ToolOutcome::err(e),
    };
    let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
    match workspace.search(query, path).await {
        Ok(hits) => ToolOutcome::ok(hits.join("\n")),
        Err(e) => ToolOutcome::err(e.to_string()),
    }
}

async fn run_shell(
    args: &Value,
    session: &mut Session,
    workspace: &Workspace,
    approval: &dyn ApprovalCallback,
) -> ToolOutcome {
    let command = match required_str(args, "command") {
        Ok(c) => c,
        Err(e) => return ToolOutcome::err(e),
    };
    let cwd = args.get("cwd").and_then(Value::as_str).unwrap_or(".");

    if let crate::security::ValidationResult::Denied(reason) =
        validate_shell_command(command, approval).await
    {
        return ToolOutcome::err(reason);
    }

    match workspace.run_shell(command, cwd).await {
        Ok(output) => {
            // A shell command's effect on the workspace can't be known
            // without parsing it, so it's conservatively treated as a
            // mutation — this is what makes it subject to the
            // single-mutation-per-step rail.
            session.bump_workspace_version();
            ToolOutcome::mutated(output.render(), cwd)
        }
        Err(e) => ToolOutcome::err(e.to_string()),
    }
}
