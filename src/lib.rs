pub mod agent;
pub mod ai;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod logging;
pub mod security;
pub mod session;
pub mod subscribers;
pub mod workspace;

/// Convenience re-exports for the most commonly used traits and types
/// across the crate.
///
/// ```rust
/// use myclaw::prelude::*;
/// ```
pub mod prelude {
    pub use crate::ai::provider::LLMProvider;
    pub use crate::ai::types::{CompletionRequest, CompletionResponse, Message, MessageRole};

    pub use crate::agent::turn_engine::run_turn;

    pub use crate::security::ApprovalCallback;

    pub use crate::event_bus::{AgentEvent, EventBus};

    pub use crate::config::Config;

    pub use crate::session::{Session, SessionStore, SharedSession};

    pub use crate::error::AgentError;
}
