//! Runtime configuration: provider credentials, resilience tuning and chat
//! defaults, loadable from the process environment.

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;
use crate::core::types::RequestOptions;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::RetryConfig;

pub const ANTHROPIC_PROVIDER: &str = "anthropic";
pub const OPENAI_PROVIDER: &str = "openai";

/// Providers this crate ships adapters for, in registration order.
pub const KNOWN_PROVIDERS: &[&str] = &[ANTHROPIC_PROVIDER, OPENAI_PROVIDER];

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const ANTHROPIC_BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
pub const ANTHROPIC_MODEL_ENV: &str = "ANTHROPIC_MODEL";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const OPENAI_MODEL_ENV: &str = "OPENAI_MODEL";
pub const CHAT_DEFAULT_PROVIDER_ENV: &str = "CHAT_DEFAULT_PROVIDER";
pub const CHAT_FALLBACK_PROVIDER_ENV: &str = "CHAT_FALLBACK_PROVIDER";
pub const CHAT_SYSTEM_PROMPT_ENV: &str = "CHAT_SYSTEM_PROMPT";
pub const CHAT_REQUEST_TIMEOUT_MS_ENV: &str = "CHAT_REQUEST_TIMEOUT_MS";
pub const CHAT_HEALTH_CHECK_INTERVAL_SECS_ENV: &str = "CHAT_HEALTH_CHECK_INTERVAL_SECS";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

/// Connection settings for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Model used when a request names none. `None` keeps the adapter's default.
    pub default_model: Option<String>,
    /// Overrides the shared retry policy's attempt budget for this provider.
    pub max_retries: Option<u32>,
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            default_model: None,
            max_retries: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ProviderConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    pub fn validate(&self, provider: &str) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                timeout_ms: self.timeout_ms,
            });
        }
        if self.max_retries == Some(0) {
            return Err(ConfigError::InvalidProviderConfig {
                provider: provider.to_string(),
                reason: "max_retries must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    /// The shared retry policy with this provider's attempt budget applied.
    pub fn retry_config(&self, shared: &RetryConfig) -> RetryConfig {
        let mut retry = shared.clone();
        if let Some(max_retries) = self.max_retries {
            retry.max_attempts = max_retries;
        }
        retry
    }
}

/// Orchestrator defaults applied to every chat call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub system_prompt: Option<String>,
    pub fallback_provider: Option<String>,
    pub default_options: RequestOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub anthropic: ProviderConfig,
    pub openai: ProviderConfig,
    pub default_provider: Option<String>,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub chat: ChatSettings,
    /// Interval of the background health monitor; `0` disables it.
    pub health_check_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            anthropic: ProviderConfig::default(),
            openai: ProviderConfig::default(),
            default_provider: None,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            chat: ChatSettings::default(),
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a validated config from `lookup`, which maps an environment
    /// variable name to its value. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();

        let timeout_ms = match read(CHAT_REQUEST_TIMEOUT_MS_ENV) {
            Some(raw) => parse_number(CHAT_REQUEST_TIMEOUT_MS_ENV, &raw)?,
            None => DEFAULT_TIMEOUT_MS,
        };
        if let Some(raw) = read(CHAT_HEALTH_CHECK_INTERVAL_SECS_ENV) {
            config.health_check_interval_secs =
                parse_number(CHAT_HEALTH_CHECK_INTERVAL_SECS_ENV, &raw)?;
        }

        config.anthropic = ProviderConfig {
            api_key: read(ANTHROPIC_API_KEY_ENV),
            base_url: read(ANTHROPIC_BASE_URL_ENV),
            default_model: read(ANTHROPIC_MODEL_ENV),
            max_retries: None,
            timeout_ms,
        };
        config.openai = ProviderConfig {
            api_key: read(OPENAI_API_KEY_ENV),
            base_url: read(OPENAI_BASE_URL_ENV),
            default_model: read(OPENAI_MODEL_ENV),
            max_retries: None,
            timeout_ms,
        };

        config.default_provider = read(CHAT_DEFAULT_PROVIDER_ENV).map(|name| name.to_lowercase());
        config.chat.fallback_provider =
            read(CHAT_FALLBACK_PROVIDER_ENV).map(|name| name.to_lowercase());
        config.chat.system_prompt = read(CHAT_SYSTEM_PROMPT_ENV);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.anthropic.validate(ANTHROPIC_PROVIDER)?;
        self.openai.validate(OPENAI_PROVIDER)?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.chat.default_options.validate()?;

        for name in [&self.default_provider, &self.chat.fallback_provider]
            .into_iter()
            .flatten()
        {
            if !KNOWN_PROVIDERS.contains(&name.as_str()) {
                return Err(ConfigError::UnknownProvider { name: name.clone() });
            }
        }
        Ok(())
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>()
        .map_err(|_| ConfigError::InvalidProviderConfig {
            provider: "runtime".to_string(),
            reason: format!("{name} must be a non-negative integer, got '{raw}'"),
        })
}
