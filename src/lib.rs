pub mod chat;
pub mod config;
pub mod core;
pub mod providers;
pub mod registry;
pub mod resilience;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use crate::chat::{
    ChatExchange, ChatMessage, ChatOrchestrator, ConversationStore, InMemoryConversationStore,
    PersistenceSink, StreamingReply,
};
pub use crate::config::{ChatSettings, ProviderConfig, RuntimeConfig};
pub use crate::core::error::{ConfigError, ErrorKind, ProviderError, RuntimeError};
pub use crate::core::traits::{ProviderAdapter, StreamHandler};
pub use crate::core::types::*;
pub use crate::registry::ProviderRegistry;
