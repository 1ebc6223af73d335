use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::error::ProviderError;
use crate::core::types::{
    HealthStatus, Message, NormalizedResponse, ProviderCapabilities, RequestOptions,
};
use crate::resilience::circuit_breaker::CircuitMetrics;

/// Receiver for incremental generation output.
///
/// Callbacks fire in decode order. After `on_complete` or `on_error` no
/// further callbacks fire for that request, and none fire at all once the
/// request has been cancelled.
pub trait StreamHandler: Send + Sync {
    fn on_start(&self) {}

    fn on_token(&self, text: &str);

    fn on_complete(&self, full_text: &str);

    fn on_error(&self, error: &ProviderError);
}

/// One LLM vendor behind a provider-agnostic interface.
///
/// Implementations normalize vendor failures into [`ProviderError`] and guard
/// every network call with their own retry policy and circuit breaker.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registry key and diagnostic label.
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn send_message(
        &self,
        messages: &[Message],
        options: &RequestOptions,
    ) -> Result<NormalizedResponse, ProviderError>;

    /// Streams a completion into `handler`. `on_start` fires before the
    /// request is issued. The assembled response is also returned.
    async fn send_streaming_message(
        &self,
        messages: &[Message],
        handler: &dyn StreamHandler,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResponse, ProviderError>;

    /// Low-cost liveness probe. Failures are reported in the status, never raised.
    /// Probes bypass retry and the circuit breaker, so they never move breaker state.
    async fn check_health(&self) -> HealthStatus;

    fn circuit_metrics(&self) -> Option<CircuitMetrics> {
        None
    }

    fn reset_circuit(&self) {}
}

#[cfg(test)]
mod tests;
