use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::core::error::{ConfigError, ProviderError};

const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";

const CONTEXT_TOO_LONG_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "prompt is too long",
    "too many tokens",
    "context window",
];

/// Vendor error body reduced to what error classification needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VendorError {
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub message: String,
    pub request_id: Option<String>,
}

/// Extracts a [`VendorError`] from a raw error body, if the body has the
/// vendor's error envelope shape.
pub type VendorErrorParser = fn(&str) -> Option<VendorError>;

/// JSON-over-HTTP plumbing for one provider. Does not retry; callers wrap it
/// in a resilience guard.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    provider: String,
    timeout_ms: u64,
    request_id_header: HeaderName,
    error_parser: VendorErrorParser,
}

impl HttpTransport {
    pub fn new(
        provider: impl Into<String>,
        timeout_ms: u64,
        error_parser: VendorErrorParser,
    ) -> Result<Self, ConfigError> {
        Self::with_client(reqwest::Client::new(), provider, timeout_ms, error_parser)
    }

    pub fn with_client(
        client: reqwest::Client,
        provider: impl Into<String>,
        timeout_ms: u64,
        error_parser: VendorErrorParser,
    ) -> Result<Self, ConfigError> {
        Self::validate_timeout(timeout_ms)?;

        Ok(Self {
            client,
            provider: provider.into(),
            timeout_ms,
            request_id_header: HeaderName::from_static(DEFAULT_REQUEST_ID_HEADER),
            error_parser,
        })
    }

    pub fn with_request_id_header(mut self, header: &'static str) -> Self {
        self.request_id_header = HeaderName::from_static(header);
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// POSTs a JSON body and decodes a JSON response. The timeout covers the
    /// whole exchange, body included.
    pub async fn post_json<TReq>(
        &self,
        model: Option<&str>,
        url: &str,
        headers: &HeaderMap,
        body: &TReq,
    ) -> Result<Value, ProviderError>
    where
        TReq: Serialize + ?Sized,
    {
        let payload = self.encode_body(model, body)?;

        let response = self
            .client
            .post(url)
            .timeout(Duration::from_millis(self.timeout_ms))
            .headers(headers.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload)
            .send()
            .await
            .map_err(|error| self.map_send_error(&error))?;

        let response = self.check_status(model, response).await?;
        let request_id = extract_request_id(response.headers(), &self.request_id_header);

        response.json::<Value>().await.map_err(|error| {
            if error.is_timeout() {
                return self.timeout_error();
            }
            ProviderError::Serialization {
                provider: self.provider.clone(),
                model: model.map(str::to_string),
                message: match request_id {
                    Some(request_id) => format!("{error} (request_id={request_id})"),
                    None => error.to_string(),
                },
            }
        })
    }

    /// POSTs a JSON body and returns the successful response with its body
    /// unread. The timeout only bounds the wait for response headers; callers
    /// reading the body apply it per chunk as an idle timeout.
    pub async fn post_stream<TReq>(
        &self,
        model: Option<&str>,
        url: &str,
        headers: &HeaderMap,
        body: &TReq,
    ) -> Result<Response, ProviderError>
    where
        TReq: Serialize + ?Sized,
    {
        let payload = self.encode_body(model, body)?;

        let request = self
            .client
            .post(url)
            .headers(headers.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload)
            .send();

        let response = tokio::time::timeout(Duration::from_millis(self.timeout_ms), request)
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|error| self.map_send_error(&error))?;

        self.check_status(model, response).await
    }

    /// Maps a failure while reading a response body.
    pub fn map_body_error(&self, error: &reqwest::Error) -> ProviderError {
        self.map_send_error(error)
    }

    fn encode_body<TReq>(&self, model: Option<&str>, body: &TReq) -> Result<Vec<u8>, ProviderError>
    where
        TReq: Serialize + ?Sized,
    {
        serde_json::to_vec(body).map_err(|error| ProviderError::Serialization {
            provider: self.provider.clone(),
            model: model.map(str::to_string),
            message: error.to_string(),
        })
    }

    async fn check_status(
        &self,
        model: Option<&str>,
        response: Response,
    ) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => format!("failed to read response body: {error}"),
        };

        Err(classify_status_error(
            &self.provider,
            model,
            status,
            &headers,
            &self.request_id_header,
            &body,
            self.error_parser,
        ))
    }

    fn map_send_error(&self, error: &reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            return self.timeout_error();
        }

        debug!(provider = %self.provider, error = %error, "http transport failure");
        ProviderError::Network {
            provider: self.provider.clone(),
            message: error_chain(error),
        }
    }

    pub fn timeout_error(&self) -> ProviderError {
        ProviderError::Timeout {
            provider: self.provider.clone(),
            timeout_ms: self.timeout_ms,
        }
    }

    fn validate_timeout(timeout_ms: u64) -> Result<(), ConfigError> {
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout { timeout_ms });
        }
        Ok(())
    }
}

/// Turns a non-success HTTP status into a typed provider error.
pub fn classify_status_error(
    provider: &str,
    model: Option<&str>,
    status: StatusCode,
    headers: &HeaderMap,
    request_id_header: &HeaderName,
    body: &str,
    error_parser: VendorErrorParser,
) -> ProviderError {
    let status_code = status.as_u16();
    let vendor = error_parser(body);

    let request_id = extract_request_id(headers, request_id_header)
        .or_else(|| vendor.as_ref().and_then(|vendor| vendor.request_id.clone()));
    let message = match &vendor {
        Some(vendor) => format_vendor_message(vendor),
        None if body.trim().is_empty() => format!("http status {status_code}"),
        None => body.to_string(),
    };
    let provider = provider.to_string();
    let model = model.map(str::to_string);

    match status_code {
        401 | 403 => ProviderError::Authentication {
            provider,
            status_code,
            request_id,
            message,
        },
        429 => ProviderError::RateLimited {
            provider,
            request_id,
            retry_after_secs: headers
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok()),
            message,
        },
        413 => ProviderError::ContextTooLong {
            provider,
            model,
            request_id,
            message,
        },
        400 if is_context_too_long(vendor.as_ref(), body) => ProviderError::ContextTooLong {
            provider,
            model,
            request_id,
            message,
        },
        400..=499 => ProviderError::InvalidRequest {
            provider,
            model,
            status_code,
            request_id,
            message,
        },
        _ => ProviderError::Status {
            provider,
            model,
            status_code,
            request_id,
            message,
        },
    }
}

fn is_context_too_long(vendor: Option<&VendorError>, body: &str) -> bool {
    let haystack = match vendor {
        Some(vendor) => format!(
            "{} {} {}",
            vendor.code.as_deref().unwrap_or_default(),
            vendor.error_type.as_deref().unwrap_or_default(),
            vendor.message
        ),
        None => body.to_string(),
    }
    .to_ascii_lowercase();

    CONTEXT_TOO_LONG_MARKERS
        .iter()
        .any(|marker| haystack.contains(marker))
}

fn format_vendor_message(vendor: &VendorError) -> String {
    match &vendor.error_type {
        Some(error_type) => format!("{error_type}: {}", vendor.message),
        None => vendor.message.clone(),
    }
}

fn extract_request_id(headers: &HeaderMap, request_id_header: &HeaderName) -> Option<String> {
    headers
        .get(request_id_header)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
