//! Conversation orchestration on top of the provider registry.
//!
//! The orchestrator owns conversation history, assembles provider requests
//! from it, fails over to a fallback provider once, and turns provider
//! failures into assistant messages the user can read. Streaming generations
//! run as tokio tasks and can be stopped individually by message id.

pub mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use self::store::{ConversationStore, InMemoryConversationStore, PersistenceSink};
pub use crate::config::ChatSettings;
use crate::core::error::{ErrorKind, ProviderError, RuntimeError};
use crate::core::traits::{ProviderAdapter, StreamHandler};
use crate::core::types::{
    Message, MessageRole, NormalizedResponse, RequestOptions, Usage, new_conversation_id,
    new_message_id,
};
use crate::providers::render_context_documents;
use crate::registry::ProviderRegistry;

const AUTHENTICATION_TEXT: &str =
    "Authentication with the AI provider failed. Please check your API key configuration.";
const RATE_LIMITED_TEXT: &str =
    "The AI provider is receiving too many requests. Please wait a moment and try again.";
const CONTEXT_TOO_LONG_TEXT: &str =
    "The conversation is too long for this model. Please reduce the message length or start a new conversation.";
const CIRCUIT_OPEN_TEXT: &str =
    "The AI service is temporarily unavailable. Please try again in a few moments.";
const CONNECTION_TEXT: &str =
    "There was a problem connecting to the AI service. Please check your connection and try again.";
const GENERIC_ERROR_TEXT: &str =
    "Sorry, I encountered an error while processing your request. Please try again.";

/// A message as stored in conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    fn new(conversation_id: &str, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            provider: None,
            model: None,
            usage: None,
            is_streaming: false,
            is_error: false,
        }
    }

    pub fn user(conversation_id: &str, content: impl Into<String>) -> Self {
        Self::new(conversation_id, MessageRole::User, content)
    }

    fn assistant_placeholder(conversation_id: &str, provider: &str) -> Self {
        Self {
            provider: Some(provider.to_string()),
            is_streaming: true,
            ..Self::new(conversation_id, MessageRole::Assistant, "")
        }
    }

    fn from_response(conversation_id: &str, provider: &str, response: NormalizedResponse) -> Self {
        let mut message = Self::new(conversation_id, MessageRole::Assistant, "");
        message.apply_response(provider, response);
        message
    }

    fn from_error(conversation_id: &str, provider: &str, error: &ProviderError) -> Self {
        Self {
            provider: Some(provider.to_string()),
            is_error: true,
            ..Self::new(conversation_id, MessageRole::Assistant, user_facing_error(error))
        }
    }

    fn apply_response(&mut self, provider: &str, response: NormalizedResponse) {
        self.content = response.content;
        self.provider = Some(provider.to_string());
        self.model = Some(response.model);
        self.usage = response.usage;
        self.is_streaming = false;
        self.is_error = false;
    }

    /// The provider-facing view of this message.
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
            id: Some(self.id.clone()),
            timestamp: Some(self.timestamp),
        }
    }

    fn is_replayable(&self) -> bool {
        !self.is_error && !self.is_streaming && !self.content.is_empty()
    }
}

/// Result of a non-streaming turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatExchange {
    pub user_message: ChatMessage,
    pub ai_message: ChatMessage,
}

/// Handle to a streaming turn. `task` resolves to the final assistant
/// message once the generation completes, fails or is stopped.
#[derive(Debug)]
pub struct StreamingReply {
    pub placeholder: ChatMessage,
    pub task: JoinHandle<ChatMessage>,
}

/// Short text shown in place of a reply when a provider call fails.
pub fn user_facing_error(error: &ProviderError) -> &'static str {
    match error.kind() {
        ErrorKind::Authentication => AUTHENTICATION_TEXT,
        ErrorKind::RateLimited => RATE_LIMITED_TEXT,
        ErrorKind::ContextTooLong => CONTEXT_TOO_LONG_TEXT,
        ErrorKind::CircuitOpen => CIRCUIT_OPEN_TEXT,
        ErrorKind::Timeout | ErrorKind::Network => CONNECTION_TEXT,
        _ => GENERIC_ERROR_TEXT,
    }
}

struct StreamEntry {
    conversation_id: String,
    cancel: CancellationToken,
}

struct OrchestratorInner {
    registry: Arc<ProviderRegistry>,
    settings: ChatSettings,
    store: Arc<dyn ConversationStore>,
    sink: Option<Arc<dyn PersistenceSink>>,
    streams: Mutex<HashMap<String, StreamEntry>>,
}

/// Cheap to clone; clones share conversations and in-flight streams.
#[derive(Clone)]
pub struct ChatOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl ChatOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, settings: ChatSettings) -> Self {
        Self::with_store(
            registry,
            settings,
            Arc::new(InMemoryConversationStore::new()),
            None,
        )
    }

    pub fn with_store(
        registry: Arc<ProviderRegistry>,
        settings: ChatSettings,
        store: Arc<dyn ConversationStore>,
        sink: Option<Arc<dyn PersistenceSink>>,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                registry,
                settings,
                store,
                sink,
                streams: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.inner.registry
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.inner.settings
    }

    pub fn create_conversation(&self) -> String {
        let conversation_id = new_conversation_id();
        self.inner.store.create(&conversation_id);
        debug!(conversation_id = %conversation_id, "conversation created");
        conversation_id
    }

    pub fn history(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.inner.store.history(conversation_id)
    }

    /// Drops the conversation's history. In-flight streams keep running.
    pub fn clear_conversation(&self, conversation_id: &str) -> bool {
        self.inner.store.clear(conversation_id)
    }

    /// Runs one request/response turn.
    ///
    /// Fails only when no provider can be resolved or the options are
    /// invalid. Provider failures come back as an `is_error` assistant
    /// message that is stored like any other reply.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        options: RequestOptions,
    ) -> Result<ChatExchange, RuntimeError> {
        let inner = &self.inner;
        let options = options.or_defaults(&inner.settings.default_options);
        options.validate()?;
        let (provider, adapter) = inner.resolve_provider(&options)?;

        let user_message = inner.record_user_message(conversation_id, text).await;
        let messages = inner.assemble_messages(conversation_id, &options);
        let request_options = adapter_options(&options, false);

        info!(
            conversation_id,
            provider = %provider,
            messages = messages.len(),
            "sending chat message"
        );

        let ai_message = match adapter.send_message(&messages, &request_options).await {
            Ok(response) => ChatMessage::from_response(conversation_id, &provider, response),
            Err(error) => match inner.fallback_for(&provider) {
                Some((fallback, fallback_adapter)) => {
                    warn!(
                        conversation_id,
                        provider = %provider,
                        fallback = %fallback,
                        error = %error,
                        "provider failed, retrying on fallback"
                    );
                    let fallback_options = fallback_options(&request_options);
                    match fallback_adapter
                        .send_message(&messages, &fallback_options)
                        .await
                    {
                        Ok(response) => {
                            ChatMessage::from_response(conversation_id, &fallback, response)
                        }
                        Err(error) => inner.failure_message(conversation_id, &fallback, &error),
                    }
                }
                None => inner.failure_message(conversation_id, &provider, &error),
            },
        };

        inner.store.append(conversation_id, ai_message.clone());
        inner.persist(conversation_id, &ai_message).await;

        Ok(ChatExchange {
            user_message,
            ai_message,
        })
    }

    /// Starts a streaming turn and returns as soon as the generation task is
    /// spawned. Must be called from within a tokio runtime.
    pub async fn send_streaming_message(
        &self,
        conversation_id: &str,
        text: &str,
        handler: Arc<dyn StreamHandler>,
        options: RequestOptions,
    ) -> Result<StreamingReply, RuntimeError> {
        let inner = &self.inner;
        let options = options.or_defaults(&inner.settings.default_options);
        options.validate()?;
        let (provider, adapter) = inner.resolve_provider(&options)?;

        inner.record_user_message(conversation_id, text).await;
        let messages = inner.assemble_messages(conversation_id, &options);

        let placeholder = ChatMessage::assistant_placeholder(conversation_id, &provider);
        inner.store.append(conversation_id, placeholder.clone());

        let cancel = CancellationToken::new();
        inner.lock_streams().insert(
            placeholder.id.clone(),
            StreamEntry {
                conversation_id: conversation_id.to_string(),
                cancel: cancel.clone(),
            },
        );

        info!(
            conversation_id,
            provider = %provider,
            message_id = %placeholder.id,
            "starting streaming generation"
        );

        let job = StreamJob {
            placeholder: placeholder.clone(),
            provider,
            adapter,
            messages,
            options: adapter_options(&options, true),
            handler,
            cancel,
        };
        let task = tokio::spawn(Arc::clone(&self.inner).run_stream(job));

        Ok(StreamingReply { placeholder, task })
    }

    /// Cancels one in-flight generation. Returns `true` only for the call
    /// that actually stopped it.
    pub fn stop_streaming(&self, message_id: &str) -> bool {
        let Some(entry) = self.inner.lock_streams().remove(message_id) else {
            return false;
        };
        entry.cancel.cancel();
        info!(
            conversation_id = %entry.conversation_id,
            message_id,
            "streaming generation stopped"
        );
        true
    }

    pub fn is_streaming(&self, message_id: &str) -> bool {
        self.inner.lock_streams().contains_key(message_id)
    }

    pub fn active_streams(&self) -> Vec<String> {
        self.inner.lock_streams().keys().cloned().collect()
    }
}

struct StreamJob {
    placeholder: ChatMessage,
    provider: String,
    adapter: Arc<dyn ProviderAdapter>,
    messages: Vec<Message>,
    options: RequestOptions,
    handler: Arc<dyn StreamHandler>,
    cancel: CancellationToken,
}

impl OrchestratorInner {
    fn resolve_provider(
        &self,
        options: &RequestOptions,
    ) -> Result<(String, Arc<dyn ProviderAdapter>), RuntimeError> {
        if let Some(name) = options.provider.as_deref() {
            let adapter =
                self.registry
                    .get(name)
                    .ok_or_else(|| RuntimeError::ProviderNotRegistered {
                        provider: name.to_string(),
                    })?;
            return Ok((name.to_string(), adapter));
        }

        let name = self
            .registry
            .default_name()
            .ok_or(RuntimeError::NoProvidersConfigured)?;
        let adapter = self
            .registry
            .get(&name)
            .ok_or(RuntimeError::NoProvidersConfigured)?;
        Ok((name, adapter))
    }

    fn fallback_for(&self, failed: &str) -> Option<(String, Arc<dyn ProviderAdapter>)> {
        let name = self
            .settings
            .fallback_provider
            .as_deref()
            .filter(|name| *name != failed)?;
        let adapter = self.registry.get(name)?;
        Some((name.to_string(), adapter))
    }

    async fn record_user_message(&self, conversation_id: &str, text: &str) -> ChatMessage {
        let message = ChatMessage::user(conversation_id, text);
        self.store.append(conversation_id, message.clone());
        self.persist(conversation_id, &message).await;
        message
    }

    /// `[system(prompt)?, system(documents)?, ...history]`. Failed and
    /// unfinished replies are not replayed.
    fn assemble_messages(&self, conversation_id: &str, options: &RequestOptions) -> Vec<Message> {
        let mut messages = Vec::new();

        let system_prompt = options
            .system_prompt
            .as_deref()
            .or(self.settings.system_prompt.as_deref())
            .filter(|prompt| !prompt.trim().is_empty());
        if let Some(prompt) = system_prompt {
            messages.push(Message::system(prompt));
        }
        if let Some(documents) = render_context_documents(&options.context_documents) {
            messages.push(Message::system(documents));
        }

        messages.extend(
            self.store
                .history(conversation_id)
                .iter()
                .filter(|message| message.is_replayable())
                .map(ChatMessage::to_message),
        );
        messages
    }

    fn failure_message(
        &self,
        conversation_id: &str,
        provider: &str,
        error: &ProviderError,
    ) -> ChatMessage {
        warn!(
            conversation_id,
            provider,
            kind = ?error.kind(),
            error = %error,
            "chat request failed"
        );
        ChatMessage::from_error(conversation_id, provider, error)
    }

    async fn persist(&self, conversation_id: &str, message: &ChatMessage) {
        if let Some(sink) = &self.sink {
            sink.persist(conversation_id, message).await;
        }
    }

    async fn run_stream(self: Arc<Self>, job: StreamJob) -> ChatMessage {
        let StreamJob {
            placeholder,
            provider,
            adapter,
            messages,
            options,
            handler,
            cancel,
        } = job;
        let conversation_id = placeholder.conversation_id.clone();
        let relay = RelayHandler::new(Arc::clone(&handler));

        let outcome = adapter
            .send_streaming_message(&messages, &relay, &options, &cancel)
            .await;

        let (provider, outcome) = match outcome {
            Err(error)
                if !is_cancellation(&error, &cancel) && relay.delivered_tokens() == 0 =>
            {
                match self.fallback_for(&provider) {
                    Some((fallback, fallback_adapter)) => {
                        warn!(
                            conversation_id = %conversation_id,
                            provider = %provider,
                            fallback = %fallback,
                            error = %error,
                            "stream failed before first token, retrying on fallback"
                        );
                        let fallback_options = fallback_options(&options);
                        let outcome = fallback_adapter
                            .send_streaming_message(&messages, &relay, &fallback_options, &cancel)
                            .await;
                        (fallback, outcome)
                    }
                    None => (provider, Err(error)),
                }
            }
            other => (provider, other),
        };

        let mut message = placeholder;
        message.provider = Some(provider.clone());
        message.is_streaming = false;
        match outcome {
            Ok(response) => {
                message.apply_response(&provider, response);
                info!(
                    conversation_id = %conversation_id,
                    provider = %provider,
                    message_id = %message.id,
                    "streaming generation completed"
                );
            }
            Err(error) if is_cancellation(&error, &cancel) => {
                message.content = relay.partial_content();
                debug!(
                    conversation_id = %conversation_id,
                    message_id = %message.id,
                    kept_chars = message.content.len(),
                    "streaming generation cancelled"
                );
            }
            Err(error) => {
                handler.on_error(&error);
                let failed = self.failure_message(&conversation_id, &provider, &error);
                let partial = relay.partial_content();
                message.content = if partial.is_empty() {
                    failed.content
                } else {
                    format!("{partial}\n\n{}", failed.content)
                };
                message.is_error = true;
            }
        }

        self.lock_streams().remove(&message.id);
        if !self.store.update(&conversation_id, message.clone()) {
            debug!(
                conversation_id = %conversation_id,
                message_id = %message.id,
                "conversation cleared during generation, reply not stored"
            );
        }
        self.persist(&conversation_id, &message).await;
        message
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<String, StreamEntry>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_cancellation(error: &ProviderError, cancel: &CancellationToken) -> bool {
    error.kind() == ErrorKind::Cancelled || cancel.is_cancelled()
}

/// The system prompt and documents already live in the assembled messages.
fn adapter_options(options: &RequestOptions, stream: bool) -> RequestOptions {
    RequestOptions {
        provider: None,
        system_prompt: None,
        context_documents: Vec::new(),
        stream,
        ..options.clone()
    }
}

/// A model name chosen for one vendor means nothing to another.
fn fallback_options(options: &RequestOptions) -> RequestOptions {
    RequestOptions {
        model: None,
        ..options.clone()
    }
}

/// Forwards adapter callbacks to the caller's handler while tracking what
/// was delivered. Errors are held back so the orchestrator can fail over
/// or report exactly once.
struct RelayHandler {
    inner: Arc<dyn StreamHandler>,
    started: AtomicBool,
    tokens: AtomicUsize,
    partial: Mutex<String>,
}

impl RelayHandler {
    fn new(inner: Arc<dyn StreamHandler>) -> Self {
        Self {
            inner,
            started: AtomicBool::new(false),
            tokens: AtomicUsize::new(0),
            partial: Mutex::new(String::new()),
        }
    }

    fn delivered_tokens(&self) -> usize {
        self.tokens.load(Ordering::SeqCst)
    }

    fn partial_content(&self) -> String {
        self.partial
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StreamHandler for RelayHandler {
    fn on_start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.inner.on_start();
        }
    }

    fn on_token(&self, text: &str) {
        self.tokens.fetch_add(1, Ordering::SeqCst);
        self.partial
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
        self.inner.on_token(text);
    }

    fn on_complete(&self, full_text: &str) {
        self.inner.on_complete(full_text);
    }

    fn on_error(&self, _error: &ProviderError) {}
}
