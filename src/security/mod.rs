//! Destructive-command safety rail.
//!
//! Read-before-write and create-guard enforcement live in
//! [`crate::agent::turn_engine`], where the session state they depend on
//! (which paths have been read, the write lock) already lives. This module
//! only covers the one rail that needs an external decision: whether a
//! destructive shell command is allowed to run.

pub mod policy;

pub use policy::{
    is_destructive, validate_shell_command, AlwaysApprove, AlwaysDeny, ApprovalCallback,
    ValidationResult,
};
