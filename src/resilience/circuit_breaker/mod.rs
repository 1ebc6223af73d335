use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::error::{ConfigError, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before probing.
    pub reset_timeout_ms: u64,
    /// Consecutive half-open successes needed to close again.
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidCircuitBreaker {
                reason: "failure_threshold must be >= 1".to_string(),
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::InvalidCircuitBreaker {
                reason: "success_threshold must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    /// Bumped on every state transition so late outcomes can be told apart.
    generation: u64,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            last_failure_time: None,
            probe_in_flight: false,
            generation: 0,
            total_calls: 0,
            total_failures: 0,
            rejected_calls: 0,
        }
    }
}

enum Admission {
    Allowed(Ticket),
    Rejected { retry_after: Duration },
}

/// What an admitted call was let in as. Only a probe ticket from the current
/// generation may move a half-open circuit.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    generation: u64,
    probe: bool,
}

/// Releases an abandoned probe slot when the guarded future is dropped
/// before it settles.
struct PendingCall<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Ticket,
    settled: bool,
}

impl PendingCall<'_> {
    fn settle<T>(mut self, result: &Result<T, ProviderError>) {
        self.settled = true;
        match result {
            Ok(_) => self.breaker.record_success(self.ticket),
            // A caller giving up says nothing about the dependency's health.
            Err(ProviderError::Cancelled { .. }) => self.breaker.release_probe(self.ticket),
            Err(_) => self.breaker.record_failure(self.ticket),
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_probe(self.ticket);
        }
    }
}

/// Three-state failure gate for a single dependency.
///
/// Every transition happens inside one mutex critical section; the lock is
/// never held while the guarded operation runs.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::closed()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let inner = self.lock();
        CircuitMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.generation += 1;
        info!(breaker = %self.name, "circuit breaker reset");
    }

    /// Runs `operation` unless the circuit is open, in which case a
    /// `CircuitOpen` error is returned without invoking it.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        match self.admit() {
            Admission::Allowed(ticket) => self.run(ticket, operation).await,
            Admission::Rejected { retry_after } => Err(ProviderError::CircuitOpen {
                provider: self.name.clone(),
                retry_after_ms: retry_after.as_millis() as u64,
            }),
        }
    }

    /// Like [`execute`](Self::execute) but answers rejected calls with `fallback`.
    pub async fn execute_with_fallback<F, Fut, G, GFut, T>(
        &self,
        operation: F,
        fallback: G,
    ) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, ProviderError>>,
    {
        match self.admit() {
            Admission::Allowed(ticket) => self.run(ticket, operation).await,
            Admission::Rejected { .. } => {
                debug!(breaker = %self.name, "circuit open, using fallback");
                fallback().await
            }
        }
    }

    async fn run<F, Fut, T>(&self, ticket: Ticket, operation: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let pending = PendingCall {
            breaker: self,
            ticket,
            settled: false,
        };
        let result = operation().await;
        pending.settle(&result);
        result
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        inner.total_calls += 1;

        match inner.state {
            CircuitState::Closed => Admission::Allowed(Ticket {
                generation: inner.generation,
                probe: false,
            }),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed())
                    .unwrap_or_default();
                let reset_timeout = self.config.reset_timeout();

                if elapsed >= reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.probe_in_flight = true;
                    inner.generation += 1;
                    info!(breaker = %self.name, "circuit breaker half-open, probing");
                    Admission::Allowed(Ticket {
                        generation: inner.generation,
                        probe: true,
                    })
                } else {
                    inner.rejected_calls += 1;
                    Admission::Rejected {
                        retry_after: reset_timeout - elapsed,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.rejected_calls += 1;
                    Admission::Rejected {
                        retry_after: Duration::ZERO,
                    }
                } else {
                    inner.probe_in_flight = true;
                    Admission::Allowed(Ticket {
                        generation: inner.generation,
                        probe: true,
                    })
                }
            }
        }
    }

    fn record_success(&self, ticket: Ticket) {
        let mut inner = self.lock();
        if ticket.generation != inner.generation {
            debug!(breaker = %self.name, "ignoring success of a call admitted before the last transition");
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen if ticket.probe => {
                inner.probe_in_flight = false;
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    inner.generation += 1;
                    info!(breaker = %self.name, "circuit breaker closed");
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn record_failure(&self, ticket: Ticket) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.last_failure_time = Some(Utc::now());
        if ticket.generation != inner.generation {
            debug!(breaker = %self.name, "ignoring failure of a call admitted before the last transition");
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.generation += 1;
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        reset_timeout_ms = self.config.reset_timeout_ms,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if ticket.probe => {
                inner.failure_count += 1;
                inner.success_count = 0;
                inner.probe_in_flight = false;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.generation += 1;
                warn!(breaker = %self.name, "circuit breaker probe failed, reopening");
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release_probe(&self, ticket: Ticket) {
        let mut inner = self.lock();
        if ticket.probe
            && ticket.generation == inner.generation
            && inner.state == CircuitState::HalfOpen
        {
            inner.probe_in_flight = false;
            debug!(breaker = %self.name, "half-open probe abandoned, slot released");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
