//! Plumbing shared by the HTTP-backed adapters: one guarded endpoint, one
//! translator, streaming with cancellation, and health probing.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use reqwest::Response;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::{ErrorKind, ProviderError};
use crate::core::traits::StreamHandler;
use crate::core::types::{
    HealthStatus, Message, NormalizedResponse, RequestOptions, StreamAccumulator,
};
use crate::providers::translator_contract::{ProviderTranslator, StreamSignal};
use crate::resilience::ResilienceGuard;
use crate::resilience::circuit_breaker::CircuitMetrics;
use crate::transport::http::HttpTransport;
use crate::transport::sse::{SseDecoder, SseEvent};

const HEALTH_PROBE_TEXT: &str = "ping";

#[derive(Debug, Default)]
struct ResponseTimes {
    samples: u64,
    total_ms: u64,
}

impl ResponseTimes {
    fn average(&self) -> Option<u64> {
        (self.samples > 0).then(|| self.total_ms / self.samples)
    }
}

pub(crate) struct ProviderClient<T> {
    translator: T,
    transport: HttpTransport,
    guard: ResilienceGuard,
    endpoint: String,
    headers: HeaderMap,
    response_times: Mutex<ResponseTimes>,
}

impl<T: ProviderTranslator> ProviderClient<T> {
    pub(crate) fn new(
        translator: T,
        transport: HttpTransport,
        guard: ResilienceGuard,
        endpoint: String,
        headers: HeaderMap,
    ) -> Self {
        Self {
            translator,
            transport,
            guard,
            endpoint,
            headers,
            response_times: Mutex::new(ResponseTimes::default()),
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) async fn complete(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        model: &str,
    ) -> Result<NormalizedResponse, ProviderError> {
        let body = self
            .translator
            .encode_request(messages, options, model, false)?;
        let label = format!("{}.send_message", self.translator.provider());

        let payload = self
            .guard
            .execute(&label, || {
                self.transport
                    .post_json(Some(model), &self.endpoint, &self.headers, &body)
            })
            .await?;

        self.translator.decode_response(&payload, model)
    }

    /// Streams a completion into `handler`.
    ///
    /// Only the connection phase is retried. The whole logical stream,
    /// connection and body, is one outcome for the circuit breaker.
    pub(crate) async fn stream(
        &self,
        messages: &[Message],
        handler: &dyn StreamHandler,
        options: &RequestOptions,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResponse, ProviderError> {
        handler.on_start();

        let result = self
            .stream_guarded(messages, handler, options, model, cancel)
            .await;

        if let Err(error) = &result
            && error.kind() != ErrorKind::Cancelled
            && !cancel.is_cancelled()
        {
            handler.on_error(error);
        }
        result
    }

    async fn stream_guarded(
        &self,
        messages: &[Message],
        handler: &dyn StreamHandler,
        options: &RequestOptions,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResponse, ProviderError> {
        let body = self
            .translator
            .encode_request(messages, options, model, true)?;
        let label = format!("{}.send_streaming_message", self.translator.provider());

        self.guard
            .breaker()
            .execute(|| async {
                let connect = self.guard.retry_policy().execute(
                    || {
                        self.transport
                            .post_stream(Some(model), &self.endpoint, &self.headers, &body)
                    },
                    &label,
                );

                let response = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(self.cancelled()),
                    response = connect => response?,
                };

                self.consume_stream(response, handler, model, cancel).await
            })
            .await
    }

    async fn consume_stream(
        &self,
        response: Response,
        handler: &dyn StreamHandler,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResponse, ProviderError> {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut accumulator = StreamAccumulator::new();
        let idle_timeout = Duration::from_millis(self.transport.timeout_ms());

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                chunk = tokio::time::timeout(idle_timeout, body.next()) => match chunk {
                    Ok(chunk) => chunk,
                    Err(_) => {
                        warn!(
                            provider = self.translator.provider(),
                            idle_timeout_ms = self.transport.timeout_ms(),
                            "event stream stalled"
                        );
                        return Err(self.transport.timeout_error());
                    }
                },
            };

            let (events, ended) = match chunk {
                Some(Ok(bytes)) => (decoder.push(&bytes), false),
                Some(Err(error)) => return Err(self.transport.map_body_error(&error)),
                None => (decoder.finish(), true),
            };

            for event in events {
                if cancel.is_cancelled() {
                    return Err(self.cancelled());
                }

                let (event_name, data) = match event {
                    SseEvent::Done => {
                        return self.complete_stream(handler, accumulator, model, cancel);
                    }
                    SseEvent::Data { event, data } => (event, data),
                };

                match self.translator.decode_stream_event(
                    event_name.as_deref(),
                    &data,
                    model,
                    &mut accumulator,
                ) {
                    Ok(StreamSignal::Token(text)) => {
                        if !text.is_empty() {
                            accumulator.push_token(&text);
                            handler.on_token(&text);
                        }
                    }
                    Ok(StreamSignal::Continue) => {}
                    Ok(StreamSignal::Done) => {
                        return self.complete_stream(handler, accumulator, model, cancel);
                    }
                    Ok(StreamSignal::Failed(error)) => return Err(error),
                    Err(reason) => debug!(
                        provider = self.translator.provider(),
                        reason = %reason,
                        "skipping malformed stream event"
                    ),
                }
            }

            if ended {
                return self.complete_stream(handler, accumulator, model, cancel);
            }
        }
    }

    fn complete_stream(
        &self,
        handler: &dyn StreamHandler,
        accumulator: StreamAccumulator,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResponse, ProviderError> {
        if cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        handler.on_complete(accumulator.content());
        Ok(accumulator.finish(model))
    }

    /// One-token probe straight through the transport. Probes bypass the
    /// guard so they neither retry nor move the breaker.
    pub(crate) async fn probe(&self, model: &str) -> HealthStatus {
        let options = RequestOptions {
            max_tokens: Some(1),
            ..RequestOptions::default()
        };
        let started = Instant::now();

        let outcome = match self.translator.encode_request(
            &[Message::user(HEALTH_PROBE_TEXT)],
            &options,
            model,
            false,
        ) {
            Ok(body) => self
                .transport
                .post_json(Some(model), &self.endpoint, &self.headers, &body)
                .await
                .map(|_| ()),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(()) => {
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                HealthStatus {
                    is_healthy: true,
                    last_checked: Utc::now(),
                    average_response_time_ms: self.record_response_time(elapsed_ms),
                    message: None,
                }
            }
            Err(error) => {
                warn!(
                    provider = self.translator.provider(),
                    error = %error,
                    "health probe failed"
                );
                HealthStatus {
                    is_healthy: false,
                    last_checked: Utc::now(),
                    average_response_time_ms: self.lock_response_times().average(),
                    message: Some(error.to_string()),
                }
            }
        }
    }

    pub(crate) fn circuit_metrics(&self) -> CircuitMetrics {
        self.guard.metrics()
    }

    pub(crate) fn reset_circuit(&self) {
        self.guard.breaker().reset();
    }

    fn record_response_time(&self, elapsed_ms: u64) -> Option<u64> {
        let mut times = self.lock_response_times();
        times.samples += 1;
        times.total_ms = times.total_ms.saturating_add(elapsed_ms);
        times.average()
    }

    fn lock_response_times(&self) -> std::sync::MutexGuard<'_, ResponseTimes> {
        self.response_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn cancelled(&self) -> ProviderError {
        ProviderError::Cancelled {
            provider: self.translator.provider().to_string(),
        }
    }
}
