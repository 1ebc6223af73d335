use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::config::{ANTHROPIC_API_KEY_ENV, ProviderConfig};
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::{ProviderAdapter, StreamHandler};
use crate::core::types::{
    HealthStatus, Message, NormalizedResponse, ProviderCapabilities, RequestOptions,
};
use crate::providers::anthropic_translate::{
    AnthropicTranslator, PROVIDER_NAME, parse_anthropic_error_envelope,
};
use crate::providers::client::ProviderClient;
use crate::providers::{normalize_base_url, sanitize_api_key};
use crate::resilience::ResilienceGuard;
use crate::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitMetrics};
use crate::resilience::retry::RetryConfig;
use crate::transport::http::HttpTransport;

const ANTHROPIC_DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_REQUEST_ID_HEADER: &str = "request-id";
const ANTHROPIC_DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const ANTHROPIC_MAX_OUTPUT_TOKENS: u32 = 8192;
const ANTHROPIC_MODELS: &[&str] = &[
    "claude-opus-4-1",
    "claude-sonnet-4-5",
    "claude-haiku-4-5",
    "claude-3-5-haiku-latest",
];

const HEADER_API_KEY: &str = "x-api-key";
const HEADER_ANTHROPIC_VERSION: &str = "anthropic-version";

pub struct AnthropicAdapter {
    client: ProviderClient<AnthropicTranslator>,
    default_model: String,
}

impl AnthropicAdapter {
    /// Builds an adapter with default retry and breaker settings.
    pub fn from_api_key(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(
            &ProviderConfig::with_api_key(api_key),
            RetryConfig::default(),
            CircuitBreakerConfig::default(),
        )
    }

    pub fn new(
        config: &ProviderConfig,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate(PROVIDER_NAME)?;
        let api_key = sanitize_api_key(config.api_key.as_deref()).ok_or_else(|| {
            ConfigError::MissingApiKey {
                provider: PROVIDER_NAME.to_string(),
                env_var: ANTHROPIC_API_KEY_ENV.to_string(),
            }
        })?;

        let transport = HttpTransport::new(
            PROVIDER_NAME,
            config.timeout_ms,
            parse_anthropic_error_envelope,
        )?
        .with_request_id_header(ANTHROPIC_REQUEST_ID_HEADER);
        let guard = ResilienceGuard::new(PROVIDER_NAME, config.retry_config(&retry), breaker)?;

        let base_url = normalize_base_url(config.base_url.as_deref(), ANTHROPIC_DEFAULT_BASE_URL);
        let endpoint = format!("{base_url}/v1/messages");

        Ok(Self {
            client: ProviderClient::new(
                AnthropicTranslator,
                transport,
                guard,
                endpoint,
                request_headers(&api_key)?,
            ),
            default_model: config
                .default_model
                .clone()
                .unwrap_or_else(|| ANTHROPIC_DEFAULT_MODEL.to_string()),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }

    fn resolve_model<'a>(&'a self, options: &'a RequestOptions) -> &'a str {
        options.model.as_deref().unwrap_or(&self.default_model)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn capabilities(&self) -> ProviderCapabilities {
        let mut supported_models: Vec<String> =
            ANTHROPIC_MODELS.iter().map(|model| model.to_string()).collect();
        if !supported_models.contains(&self.default_model) {
            supported_models.push(self.default_model.clone());
        }

        ProviderCapabilities {
            name: PROVIDER_NAME.to_string(),
            display_name: "Anthropic Claude".to_string(),
            supports_streaming: true,
            supports_documents: true,
            max_tokens: ANTHROPIC_MAX_OUTPUT_TOKENS,
            supported_models,
            default_model: self.default_model.clone(),
        }
    }

    async fn send_message(
        &self,
        messages: &[Message],
        options: &RequestOptions,
    ) -> Result<NormalizedResponse, ProviderError> {
        let model = self.resolve_model(options);
        self.client.complete(messages, options, model).await
    }

    async fn send_streaming_message(
        &self,
        messages: &[Message],
        handler: &dyn StreamHandler,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResponse, ProviderError> {
        let model = self.resolve_model(options);
        self.client
            .stream(messages, handler, options, model, cancel)
            .await
    }

    async fn check_health(&self) -> HealthStatus {
        self.client.probe(&self.default_model).await
    }

    fn circuit_metrics(&self) -> Option<CircuitMetrics> {
        Some(self.client.circuit_metrics())
    }

    fn reset_circuit(&self) {
        self.client.reset_circuit();
    }
}

fn request_headers(api_key: &str) -> Result<HeaderMap, ConfigError> {
    let mut api_key =
        HeaderValue::from_str(api_key).map_err(|_| ConfigError::InvalidProviderConfig {
            provider: PROVIDER_NAME.to_string(),
            reason: "api key contains characters not allowed in a header".to_string(),
        })?;
    api_key.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(HEADER_API_KEY, api_key);
    headers.insert(
        HEADER_ANTHROPIC_VERSION,
        HeaderValue::from_static(ANTHROPIC_VERSION),
    );
    Ok(headers)
}
