use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

const ID_SUFFIX_LEN: usize = 9;
const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Provider-agnostic conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            id: None,
            timestamp: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub content: String,
}

/// Per-call request shaping. Constructed per call and never stored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_documents: Vec<ContextDocument>,
    pub stream: bool,
}

impl RequestOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(temperature) = self.temperature {
            if !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
                return Err(ConfigError::InvalidRequestOptions {
                    reason: format!("temperature must be in 0..=2, got {temperature}"),
                });
            }
        }
        if self.max_tokens == Some(0) {
            return Err(ConfigError::InvalidRequestOptions {
                reason: "max_tokens must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    /// Fills every unset field from `defaults`, leaving explicit values alone.
    pub fn or_defaults(mut self, defaults: &RequestOptions) -> Self {
        if self.provider.is_none() {
            self.provider = defaults.provider.clone();
        }
        if self.model.is_none() {
            self.model = defaults.model.clone();
        }
        if self.temperature.is_none() {
            self.temperature = defaults.temperature;
        }
        if self.max_tokens.is_none() {
            self.max_tokens = defaults.max_tokens;
        }
        if self.system_prompt.is_none() {
            self.system_prompt = defaults.system_prompt.clone();
        }
        if self.context_documents.is_empty() {
            self.context_documents = defaults.context_documents.clone();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub id: String,
    pub content: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub finish_reason: FinishReason,
    pub timestamp: DateTime<Utc>,
}

/// Incremental builder for a streamed [`NormalizedResponse`].
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    id: Option<String>,
    model: Option<String>,
    content: String,
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    finish_reason: Option<FinishReason>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id.get_or_insert_with(|| id.into());
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model.get_or_insert_with(|| model.into());
    }

    pub fn push_token(&mut self, text: &str) {
        self.content.push_str(text);
    }

    pub fn set_prompt_tokens(&mut self, tokens: u64) {
        self.prompt_tokens = Some(tokens);
    }

    pub fn set_completion_tokens(&mut self, tokens: u64) {
        self.completion_tokens = Some(tokens);
    }

    pub fn set_finish_reason(&mut self, reason: FinishReason) {
        self.finish_reason = Some(reason);
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn finish(self, fallback_model: &str) -> NormalizedResponse {
        let usage = match (self.prompt_tokens, self.completion_tokens) {
            (None, None) => None,
            (prompt, completion) => Some(Usage::new(
                prompt.unwrap_or(0),
                completion.unwrap_or(0),
            )),
        };

        NormalizedResponse {
            id: self.id.unwrap_or_else(new_message_id),
            content: self.content,
            model: self.model.unwrap_or_else(|| fallback_model.to_string()),
            usage,
            finish_reason: self.finish_reason.unwrap_or_default(),
            timestamp: Utc::now(),
        }
    }
}

/// Static descriptor of what an adapter can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub name: String,
    pub display_name: String,
    pub supports_streaming: bool,
    pub supports_documents: bool,
    pub max_tokens: u32,
    pub supported_models: Vec<String>,
    pub default_model: String,
}

impl ProviderCapabilities {
    pub fn supports_model(&self, model: &str) -> bool {
        self.supported_models.iter().any(|candidate| candidate == model)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub last_checked: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn new_conversation_id() -> String {
    prefixed_id("conv")
}

pub fn new_message_id() -> String {
    prefixed_id("msg")
}

fn prefixed_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("{prefix}_{}_{suffix}", Utc::now().timestamp_millis())
}
