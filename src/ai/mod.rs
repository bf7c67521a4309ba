pub mod provider;
pub mod providers;
pub mod types;

pub use provider::LLMProvider;
pub use providers::{OpenAICompatibleConfig, OpenAICompatibleProvider};
pub use types::{CompletionRequest, CompletionResponse, Message, MessageRole};
