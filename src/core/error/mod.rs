use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing api key for provider {provider}; set {env_var}")]
    MissingApiKey { provider: String, env_var: String },
    #[error("unknown provider: {name}")]
    UnknownProvider { name: String },
    #[error("invalid provider config for {provider}: {reason}")]
    InvalidProviderConfig { provider: String, reason: String },
    #[error("invalid timeout: {timeout_ms} ms")]
    InvalidTimeout { timeout_ms: u64 },
    #[error("invalid retry policy: {reason}")]
    InvalidRetryPolicy { reason: String },
    #[error("invalid circuit breaker config: {reason}")]
    InvalidCircuitBreaker { reason: String },
    #[error("invalid request options: {reason}")]
    InvalidRequestOptions { reason: String },
}

/// Coarse classification of a [`ProviderError`], independent of vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    Authentication,
    ContextTooLong,
    InvalidRequest,
    Server,
    Protocol,
    CircuitOpen,
    Cancelled,
}

impl ErrorKind {
    /// Kinds that must surface immediately no matter what a retry allow-list says.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::Authentication
                | Self::ContextTooLong
                | Self::InvalidRequest
                | Self::CircuitOpen
                | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error(
        "network error{context}: {message}",
        context = format_context(Some(.provider), None, None, None)
    )]
    Network { provider: String, message: String },
    #[error(
        "request timed out{context} after {timeout_ms} ms",
        context = format_context(Some(.provider), None, None, None)
    )]
    Timeout { provider: String, timeout_ms: u64 },
    #[error(
        "rate limited{context}: {message}",
        context = format_context(Some(.provider), None, .request_id.as_deref(), Some(429))
    )]
    RateLimited {
        provider: String,
        request_id: Option<String>,
        retry_after_secs: Option<u64>,
        message: String,
    },
    #[error(
        "authentication failed{context}: {message}",
        context = format_context(Some(.provider), None, .request_id.as_deref(), Some(*.status_code))
    )]
    Authentication {
        provider: String,
        status_code: u16,
        request_id: Option<String>,
        message: String,
    },
    #[error(
        "context too long{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), .request_id.as_deref(), None)
    )]
    ContextTooLong {
        provider: String,
        model: Option<String>,
        request_id: Option<String>,
        message: String,
    },
    #[error(
        "invalid request{context}: {message}",
        context = format_context(
            Some(.provider),
            .model.as_deref(),
            .request_id.as_deref(),
            Some(*.status_code)
        )
    )]
    InvalidRequest {
        provider: String,
        model: Option<String>,
        status_code: u16,
        request_id: Option<String>,
        message: String,
    },
    #[error(
        "provider status error{context}: {message}",
        context = format_context(
            Some(.provider),
            .model.as_deref(),
            .request_id.as_deref(),
            Some(*.status_code)
        )
    )]
    Status {
        provider: String,
        model: Option<String>,
        status_code: u16,
        request_id: Option<String>,
        message: String,
    },
    #[error(
        "provider protocol error{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None, None)
    )]
    Protocol {
        provider: String,
        model: Option<String>,
        message: String,
    },
    #[error(
        "serialization error{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None, None)
    )]
    Serialization {
        provider: String,
        model: Option<String>,
        message: String,
    },
    #[error("circuit open [provider={provider}]: retry in {retry_after_ms} ms")]
    CircuitOpen { provider: String, retry_after_ms: u64 },
    #[error("request cancelled [provider={provider}]")]
    Cancelled { provider: String },
    #[error("{label} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        #[source]
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::ContextTooLong { .. } => ErrorKind::ContextTooLong,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::Status { .. } => ErrorKind::Server,
            Self::Protocol { .. } | Self::Serialization { .. } => ErrorKind::Protocol,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::RetriesExhausted { last, .. } => last.kind(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Authentication { status_code, .. }
            | Self::InvalidRequest { status_code, .. }
            | Self::Status { status_code, .. } => Some(*status_code),
            Self::RetriesExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Network { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Authentication { provider, .. }
            | Self::ContextTooLong { provider, .. }
            | Self::InvalidRequest { provider, .. }
            | Self::Status { provider, .. }
            | Self::Protocol { provider, .. }
            | Self::Serialization { provider, .. }
            | Self::CircuitOpen { provider, .. }
            | Self::Cancelled { provider } => provider,
            Self::RetriesExhausted { last, .. } => last.provider(),
        }
    }

    /// Tokens a retry allow-list is matched against: the kind tag, the
    /// status code and, for transport failures, the raw message.
    pub fn signature(&self) -> Vec<String> {
        let tag = match self.kind() {
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::ContextTooLong => "CONTEXT_TOO_LONG",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Server => "SERVER_ERROR",
            ErrorKind::Protocol => "PROTOCOL_ERROR",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::Cancelled => "CANCELLED",
        };

        let mut tokens = vec![tag.to_string()];
        if let Some(status_code) = self.status_code() {
            tokens.push(status_code.to_string());
        }
        match self {
            Self::Network { message, .. } => tokens.push(message.clone()),
            Self::RetriesExhausted { last, .. } => {
                if let Self::Network { message, .. } = last.as_ref() {
                    tokens.push(message.clone());
                }
            }
            _ => {}
        }
        tokens
    }

    /// Returns true when the signature matches any allow-list entry. Exact
    /// token match for tags and status codes, substring match on messages.
    pub fn matches_any(&self, allow_list: &[String]) -> bool {
        if self.kind().is_fatal() {
            return false;
        }

        let signature = self.signature();
        allow_list.iter().any(|allowed| {
            signature
                .iter()
                .enumerate()
                .any(|(index, token)| match index {
                    0 => token == allowed,
                    _ => token == allowed || token.contains(allowed.as_str()),
                })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    #[error("no providers configured; set an api key for at least one provider")]
    NoProvidersConfigured,
    #[error("provider not registered: {provider}")]
    ProviderNotRegistered { provider: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

fn format_context(
    provider: Option<&String>,
    model: Option<&str>,
    request_id: Option<&str>,
    status_code: Option<u16>,
) -> String {
    let mut context = Vec::new();

    if let Some(provider) = provider {
        context.push(format!("provider={provider}"));
    }
    if let Some(model) = model {
        context.push(format!("model={model}"));
    }
    if let Some(request_id) = request_id {
        context.push(format!("request_id={request_id}"));
    }
    if let Some(status_code) = status_code {
        context.push(format!("status_code={status_code}"));
    }

    if context.is_empty() {
        String::new()
    } else {
        format!(" [{}]", context.join(", "))
    }
}

#[cfg(test)]
mod tests;
