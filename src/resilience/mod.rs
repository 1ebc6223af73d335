pub mod circuit_breaker;
pub mod retry;

use std::future::Future;

use crate::core::error::{ConfigError, ProviderError};
use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics};
use retry::{RetryConfig, RetryPolicy};

/// Retry and circuit breaking for one protected dependency.
///
/// The breaker wraps the retry loop so it records one outcome per logical
/// call, not one per attempt.
#[derive(Debug)]
pub struct ResilienceGuard {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResilienceGuard {
    pub fn new(
        name: impl Into<String>,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            retry: RetryPolicy::new(retry)?,
            breaker: CircuitBreaker::new(name, breaker)?,
        })
    }

    pub async fn execute<F, Fut, T>(&self, label: &str, operation: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.breaker
            .execute(|| self.retry.execute(operation, label))
            .await
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn metrics(&self) -> CircuitMetrics {
        self.breaker.metrics()
    }
}
