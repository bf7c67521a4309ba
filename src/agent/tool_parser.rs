//! Tool-call parser for LLM responses that don't use native function calling.
//!
//! Tries three formats, in order:
//!
//! # Format 1 — OpenAI JSON
//! The response content is a JSON object containing a `tool_calls` array:
//!
//! ```json
//! {
//!   "tool_calls": [
//!     { "id": "call_abc", "type": "function",
//!       "function": { "name": "read_file", "arguments": "{\"path\": \"/tmp/x\"}" } }
//!   ]
//! }
//! ```
//!
//! # Format 2 — XML inline
//! The response is free-form text containing one or more `<tool_call>` tags:
//!
//! ```xml
//! I'll read the file now.
//! <tool_call>{"name": "read_file", "arguments": {"path": "/tmp/x"}}</tool_call>
//! ```
//!
//! # Format 3 — bare or fenced JSON object
//! Some models ignore both of the above and just emit a JSON object,
//! optionally inside a fenced ```json block:
//!
//! ```text
//! I'll check that file.
//! ```json
//! {"type": "tool_call", "tool": "read_file", "input": {"path": "/tmp/x"}}
//! ```
//! ```
//!
//! Only objects of the exact shape `{"type": "tool_call", "tool": <name>,
//! "input": <object>}` are accepted here — this format carries no call id,
//! so responses that want one must use format 1.

use serde_json::Value;

// ─── ParsedToolCall ───────────────────────────────────────────────────────────

/// A tool invocation extracted from an LLM response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    /// Tool name as registered in the tool catalog.
    pub name: String,
    /// Arguments to pass to the tool.
    pub arguments: Value,
    /// Optional call ID (present in OpenAI JSON format).
    pub call_id: Option<String>,
}

// ─── Public API ───────────────────────────────────────────────────────────────

/// Parse all tool calls from an LLM response string.
///
/// Tries the JSON `tool_calls` format first, then XML `<tool_call>` tags,
/// then a bare or fenced `{"type": "tool_call", ...}` object. Returns an
/// empty `Vec` when no tool calls are found in any format.
pub fn parse_tool_calls(content: &str) -> Vec<ParsedToolCall> {
    if let Some(calls) = try_parse_json(content) {
        if !calls.is_empty() {
            return calls;
        }
    }
    let xml_calls = parse_xml(content);
    if !xml_calls.is_empty() {
        return xml_calls;
    }
    parse_bare_or_fenced(content).into_iter().collect()
}

// ─── JSON parser (format 1) ───────────────────────────────────────────────────

fn try_parse_json(content: &str) -> Option<Vec<ParsedToolCall>> {
    let trimmed = content.trim();
    // The entire content must be a valid JSON object.
    let obj: Value = serde_json::from_str(trimmed).ok()?;
    let tool_calls = obj.get("tool_calls")?.as_array()?;

    let mut result = Vec::new();
    for entry in tool_calls {
        // OpenAI format: { "id": "...", "type": "function", "function": { "name": "...", "arguments": "..." } }
        let func = entry.get("function")?;
        let name = func.get("name")?.as_str()?.to_string();
        let call_id = entry.get("id").and_then(|v| v.as_str()).map(str::to_string);

        // `arguments` may be a JSON string (OpenAI) or an object (some providers).
        let arguments = match func.get("arguments") {
            Some(Value::String(s)) => {
                serde_json::from_str(s).unwrap_or(Value::Object(Default::default()))
            }
            Some(v) => v.clone(),
            None => Value::Object(Default::default()),
        };

        result.push(ParsedToolCall { name, arguments, call_id });
    }
    Some(result)
}

// ─── XML parser (format 2) ────────────────────────────────────────────────────

fn parse_xml(content: &str) -> Vec<ParsedToolCall> {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";

    let mut result = Vec::new();
    let mut remaining = content;

    while let Some(start) = remaining.find(OPEN) {
        remaining = &remaining[start + OPEN.len()..];
        let end = match remaining.find(CLOSE) {
            Some(i) => i,
            None => break,
        };
        let body = remaining[..end].trim();
        remaining = &remaining[end + CLOSE.len()..];

        if let Some(call) = parse_xml_body(body) {
            result.push(call);
        }
    }
    result
}

/// Parse the JSON body of a single `<tool_call>` tag.
///
/// Expected shape:
/// ```json
/// {"name": "tool_name", "arguments": { … }}
/// ```
fn parse_xml_body(body: &str) -> Option<ParsedToolCall> {
    let obj: Value = serde_json::from_str(body).ok()?;
    let name = obj.get("name")?.as_str()?.to_string();
    let arguments = obj
        .get("arguments")
        .cloned()
        .unwrap_or(Value::Object(Default::default()));
    Some(ParsedToolCall { name, arguments, call_id: None })
}

// ─── Bare/fenced JSON parser (format 3) ───────────────────────────────────────

/// Scan for a fenced ```json block first; if none parses to the expected
/// shape, fall back to scanning for the first balanced `{...}` object in
/// the raw text.
fn parse_bare_or_fenced(content: &str) -> Option<ParsedToolCall> {
    if let Some(block) = extract_fenced_json_block(content) {
        if let Some(call) = parse_tool_call_object(&block) {
            return Some(call);
        }
    }
    let candidate = first_balanced_json_object(content)?;
    parse_tool_call_object(&candidate)
}

fn extract_fenced_json_block(content: &str) -> Option<String> {
    const FENCE_VARIANTS: &[&str] = &["```json", "```JSON"];
    for fence in FENCE_VARIANTS {
        if let Some(start) = content.find(fence) {
            let after_open = &content[start + fence.len()..];
            if let Some(end) = after_open.find("```") {
                return Some(after_open[..end].trim().to_string());
            }
        }
    }
    None
}

/// Scan `content` for the first syntactically balanced `{...}` span,
/// tracking brace depth while respecting JSON string escaping so braces
/// inside string literals don't throw off the count.
fn first_balanced_json_object(content: &str) -> Option<String> {
    let bytes = content.as_bytes();
    let start = content.find('{')?;

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        let ch = byte as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(content[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_tool_call_object(candidate: &str) -> Option<ParsedToolCall> {
    let obj: Value = serde_json::from_str(candidate).ok()?;
    if obj.get("type")?.as_str()? != "tool_call" {
        return None;
    }
    let name = obj.get("tool")?.as_str()?.to_string();
    let arguments = obj.get("input")?.clone();
    if !arguments.is_object() {
        return None;
    }
    Some(ParsedToolCall { name, arguments, call_id: None })
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── XML format ────────────────────────────────────────────────────────────

    #[test]
    fn xml_single_tool_call() {
        let content = r#"Let me search for that.
<tool_call>{"name": "web_search", "arguments": {"query": "rust async"}}</tool_call>
I found something."#;

        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "web_search");
        assert_eq!(calls[0].arguments["query"], "rust async");
        assert!(calls[0].call_id.is_none());
    }

    #[test]
    fn xml_multiple_tool_calls() {
        let content = r#"<tool_call>{"name": "read_file", "arguments": {"path": "/a"}}</tool_call>
<tool_call>{"name": "read_file", "arguments": {"path": "/b"}}</tool_call>"#;

        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments["path"], "/a");
        assert_eq!(calls[1].arguments["path"], "/b");
    }

    #[test]
    fn xml_no_tool_calls() {
        let content = "The answer is 42. No tools needed.";
        let calls = parse_tool_calls(content);
        assert!(calls.is_empty());
    }

    #[test]
    fn xml_malformed_json_skipped() {
        let content = r#"<tool_call>not json</tool_call>
<tool_call>{"name": "valid_tool", "arguments": {}}</tool_call>"#;
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "valid_tool");
    }

    #[test]
    fn xml_unclosed_tag_stops_parsing() {
        let content = r#"<tool_call>{"name": "orphan""#;
        let calls = parse_tool_calls(content);
        assert!(calls.is_empty());
    }

    // ── JSON format ───────────────────────────────────────────────────────────

    #[test]
    fn json_single_tool_call() {
        let content = r#"{
  "tool_calls": [
    { "id": "call_xyz", "type": "function",
      "function": { "name": "get_weather", "arguments": "{\"city\": \"Toronto\"}" } }
  ]
}"#;
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].arguments["city"], "Toronto");
        assert_eq!(calls[0].call_id.as_deref(), Some("call_xyz"));
    }

    #[test]
    fn json_arguments_as_object_not_string() {
        let content = r#"{"tool_calls": [
            {"type": "function",
             "function": {"name": "my_tool", "arguments": {"key": "value"}}}
        ]}"#;
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["key"], "value");
    }

    #[test]
    fn json_empty_tool_calls_falls_back_to_xml_scan() {
        let content = r#"{"tool_calls": []}
<tool_call>{"name": "fallback", "arguments": {}}</tool_call>"#;
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "fallback");
    }

    #[test]
    fn plain_text_returns_empty() {
        let content = "I don't need any tools for this.";
        assert!(parse_tool_calls(content).is_empty());
    }

    // ── Bare/fenced JSON format ─────────────────────────────────────────────

    #[test]
    fn fenced_json_block_parsed() {
        let content = "I'll check that file.\n```json\n{\"type\": \"tool_call\", \"tool\": \"read_file\", \"input\": {\"path\": \"/tmp/x\"}}\n```\n";
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments["path"], "/tmp/x");
    }

    #[test]
    fn bare_balanced_json_object_parsed() {
        let content = r#"Sure thing: {"type": "tool_call", "tool": "list_files", "input": {"path": "."}} — running it now."#;
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_files");
    }

    #[test]
    fn bare_json_ignores_braces_inside_strings() {
        let content = r#"{"type": "tool_call", "tool": "write_file", "input": {"path": "a.txt", "content": "use a {fake} brace"}}"#;
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["content"], "use a {fake} brace");
    }

    #[test]
    fn bare_json_wrong_shape_is_ignored() {
        let content = r#"Here's some data: {"foo": "bar", "baz": 1}"#;
        assert!(parse_tool_calls(content).is_empty());
    }

    #[test]
    fn bare_json_requires_object_input() {
        let content = r#"{"type": "tool_call", "tool": "ping", "input": "not an object"}"#;
        assert!(parse_tool_calls(content).is_empty());
    }
}
