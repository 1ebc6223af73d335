use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::{ConfigError, ProviderError};

const JITTER_FACTOR: f64 = 0.25;

pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    "NETWORK_ERROR",
    "TIMEOUT",
    "ECONNABORTED",
    "ECONNRESET",
    "ETIMEDOUT",
    "RATE_LIMITED",
    "429",
    "502",
    "503",
    "504",
    "529",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub retryable_errors: Vec<String>,
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: "max_attempts must be >= 1".to_string(),
            });
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: "max_delay_ms must be >= initial_delay_ms".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: false,
            retryable_errors: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|entry| entry.to_string())
                .collect(),
        }
    }
}

/// Per-invocation bookkeeping, only used for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RetryAttemptContext {
    pub attempt: u32,
    pub elapsed_delay: Duration,
    pub last_error: Option<ProviderError>,
}

/// Bounded exponential-backoff retry. Holds no state between calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn is_retryable(&self, error: &ProviderError) -> bool {
        error.matches_any(&self.config.retryable_errors)
    }

    /// Delay before the retry that follows `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(63);
        let multiplier = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay_ms = self
            .config
            .initial_delay_ms
            .saturating_mul(multiplier)
            .min(self.config.max_delay_ms);

        if !self.config.jitter || delay_ms == 0 {
            return Duration::from_millis(delay_ms);
        }

        let spread = delay_ms as f64 * JITTER_FACTOR;
        let jittered = delay_ms as f64 + rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((jittered.max(0.0) as u64).min(self.config.max_delay_ms))
    }

    pub async fn execute<F, Fut, T>(&self, mut operation: F, label: &str) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut context = RetryAttemptContext::default();

        loop {
            context.attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    if context.attempt > 1 {
                        debug!(
                            label,
                            attempt = context.attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !self.is_retryable(&error) {
                return Err(error);
            }

            if context.attempt >= self.config.max_attempts {
                warn!(
                    label,
                    attempts = context.attempt,
                    elapsed_delay_ms = context.elapsed_delay.as_millis() as u64,
                    error = %error,
                    "retries exhausted"
                );
                return Err(ProviderError::RetriesExhausted {
                    label: label.to_string(),
                    attempts: context.attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.delay_for_attempt(context.attempt);
            warn!(
                label,
                attempt = context.attempt,
                max_attempts = self.config.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after error"
            );

            context.last_error = Some(error);
            context.elapsed_delay += delay;
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }
}
