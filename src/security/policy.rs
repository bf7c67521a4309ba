//! Safety rails for the agent's tool-dispatch step.
//!
//! Unlike a multi-tier autonomy system, this policy makes exactly two kinds
//! of decisions:
//!
//! 1. **Read-before-write / create-guard** — enforced by [`crate::agent::turn_engine`]
//!    directly against [`crate::session::model::Session`] state, not here.
//! 2. **Destructive shell commands** — a command matching [`is_destructive`]
//!    is never run silently; the caller must obtain approval through an
//!    [`ApprovalCallback`] first.
//!
//! There are no risk tiers, no rate limiter, and no audit log: those
//! belonged to a much larger autonomy model this agent doesn't have.

use async_trait::async_trait;
use regex::RegexSet;
use std::sync::LazyLock;

/// Outcome of validating a shell command against the destructive-pattern table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The command may run immediately.
    Allowed,
    /// The command matched a destructive pattern and was rejected by the
    /// approval callback.
    Denied(String),
}

/// Patterns that mark a shell command as destructive enough to require
/// explicit approval before it runs. Matched against the whole command
/// string, not just its executable name, so `git reset --hard` and
/// `mv foo /dev/null` are caught as well as bare `rm`.
const DESTRUCTIVE_PATTERNS: &[&str] = &[
    r"\brm\b",
    r"\brmdir\b",
    r"\bunlink\b",
    r"\bdel\b",
    r"\brd\b",
    r"mv\s+.*\s+/dev/null",
    r"git\s+reset\s+--hard",
    r"git\s+clean\b",
];

static DESTRUCTIVE_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new(DESTRUCTIVE_PATTERNS).expect("destructive pattern table is valid regex")
});

/// Returns `true` if `command` matches any destructive pattern.
pub fn is_destructive(command: &str) -> bool {
    DESTRUCTIVE_SET.is_match(command)
}

/// Asked to approve a destructive shell command before it runs.
///
/// Implementations range from an always-deny stub (tests, `doctor`) to a
/// CLI prompt that reads the answer from stdin.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn approve(&self, command: &str) -> bool;
}

/// Approves nothing. Used when no interactive operator is available.
pub struct AlwaysDeny;

#[async_trait]
impl ApprovalCallback for AlwaysDeny {
    async fn approve(&self, _command: &str) -> bool {
        false
    }
}

/// Approves everything. Used by tests and `doctor` runs that need to
/// exercise the destructive path without blocking on input.
pub struct AlwaysApprove;

#[async_trait]
impl ApprovalCallback for AlwaysApprove {
    async fn approve(&self, _command: &str) -> bool {
        true
    }
}

/// Validate `command`, consulting `approval` if it is destructive.
pub async fn validate_shell_command(
    command: &str,
    approval: &dyn ApprovalCallback,
) -> ValidationResult {
    if !is_destructive(command) {
        return ValidationResult::Allowed;
    }
    if approval.approve(command).await {
        ValidationResult::Allowed
    } else {
        ValidationResult::Denied(format!(
            "destructive command blocked: '{command}' was not approved"
        ))
    }
}
