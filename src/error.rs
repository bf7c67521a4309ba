//! Crate-wide error taxonomy.
//!
//! Most recoverable errors (tool validation, workspace I/O, provider
//! transient failures) are captured inline as `Result<_, String>` and
//! surfaced as tool results — they never unwind past a turn. `AgentError`
//! is reserved for the handful of errors that the spec says must propagate
//! to the caller: fatal provider misconfiguration, resume failure, and
//! replay corruption that aborts an entire load rather than a single line.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("replay error: {0}")]
    Replay(String),

    #[error("resume failed: {0}")]
    Resume(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
