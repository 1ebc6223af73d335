use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::chat::ChatMessage;

/// In-process conversation history owned by the orchestrator.
pub trait ConversationStore: Send + Sync {
    /// Starts an empty conversation. Existing history is left alone.
    fn create(&self, conversation_id: &str);

    /// Messages in insertion order; empty for unknown conversations.
    fn history(&self, conversation_id: &str) -> Vec<ChatMessage>;

    /// Appends to the conversation, creating it if needed.
    fn append(&self, conversation_id: &str, message: ChatMessage);

    /// Replaces the message with the same id. Returns `false` if absent.
    fn update(&self, conversation_id: &str, message: ChatMessage) -> bool;

    /// Drops the conversation. Returns `false` if it did not exist.
    fn clear(&self, conversation_id: &str) -> bool;
}

/// Receives every finished message, user and assistant alike, for durable
/// storage outside the runtime. Implementations handle their own failures.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn persist(&self, conversation_id: &str, message: &ChatMessage);
}

#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<ChatMessage>>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn create(&self, conversation_id: &str) {
        self.lock()
            .entry(conversation_id.to_string())
            .or_default();
    }

    fn history(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.lock()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    fn append(&self, conversation_id: &str, message: ChatMessage) {
        self.lock()
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
    }

    fn update(&self, conversation_id: &str, message: ChatMessage) -> bool {
        let mut conversations = self.lock();
        let Some(slot) = conversations
            .get_mut(conversation_id)
            .and_then(|history| history.iter_mut().find(|existing| existing.id == message.id))
        else {
            return false;
        };
        *slot = message;
        true
    }

    fn clear(&self, conversation_id: &str) -> bool {
        self.lock().remove(conversation_id).is_some()
    }
}
