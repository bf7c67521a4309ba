//! The agent turn engine: the reasoning loop, its tool catalog, the
//! text-based tool-call fallback parser, and oscillation observation.

pub mod oscillation;
pub mod tool_parser;
pub mod tools;
pub mod turn_engine;

pub use oscillation::{OscillationObserver, OscillationReport};
pub use tool_parser::{parse_tool_calls, ParsedToolCall};
pub use tools::{execute_tool, ToolOutcome};
pub use turn_engine::{run_turn, tool_catalog, SYSTEM_PROMPT};
