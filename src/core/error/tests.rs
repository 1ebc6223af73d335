use super::*;

fn allow_list(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|entry| entry.to_string()).collect()
}

#[test]
fn test_provider_error_display_messages() {
    let status = ProviderError::Status {
        provider: "openai".to_string(),
        model: Some("gpt-4o".to_string()),
        status_code: 503,
        request_id: Some("req_123".to_string()),
        message: "upstream unavailable".to_string(),
    };
    assert_eq!(
        status.to_string(),
        "provider status error [provider=openai, model=gpt-4o, request_id=req_123, status_code=503]: upstream unavailable"
    );

    let auth = ProviderError::Authentication {
        provider: "anthropic".to_string(),
        status_code: 401,
        request_id: None,
        message: "invalid x-api-key".to_string(),
    };
    assert_eq!(
        auth.to_string(),
        "authentication failed [provider=anthropic, status_code=401]: invalid x-api-key"
    );

    let timeout = ProviderError::Timeout {
        provider: "openai".to_string(),
        timeout_ms: 5_000,
    };
    assert_eq!(
        timeout.to_string(),
        "request timed out [provider=openai] after 5000 ms"
    );

    let exhausted = ProviderError::RetriesExhausted {
        label: "anthropic.send_message".to_string(),
        attempts: 3,
        last: Box::new(timeout),
    };
    assert_eq!(
        exhausted.to_string(),
        "anthropic.send_message failed after 3 attempts: request timed out [provider=openai] after 5000 ms"
    );
}

#[test]
fn test_config_and_runtime_error_display() {
    let missing = ConfigError::MissingApiKey {
        provider: "openai".to_string(),
        env_var: "OPENAI_API_KEY".to_string(),
    };
    assert_eq!(
        missing.to_string(),
        "missing api key for provider openai; set OPENAI_API_KEY"
    );

    let runtime: RuntimeError = missing.clone().into();
    assert_eq!(runtime, RuntimeError::ConfigError(missing));

    assert_eq!(
        RuntimeError::NoProvidersConfigured.to_string(),
        "no providers configured; set an api key for at least one provider"
    );
}

#[test]
fn test_kind_sees_through_retries_exhausted() {
    let rate_limited = ProviderError::RateLimited {
        provider: "anthropic".to_string(),
        request_id: None,
        retry_after_secs: Some(20),
        message: "slow down".to_string(),
    };
    let exhausted = ProviderError::RetriesExhausted {
        label: "send".to_string(),
        attempts: 3,
        last: Box::new(rate_limited),
    };

    assert_eq!(exhausted.kind(), ErrorKind::RateLimited);
    assert_eq!(exhausted.status_code(), Some(429));
    assert_eq!(exhausted.provider(), "anthropic");
}

#[test]
fn test_signature_contains_tag_and_status() {
    let status = ProviderError::Status {
        provider: "openai".to_string(),
        model: None,
        status_code: 502,
        request_id: None,
        message: "bad gateway".to_string(),
    };
    assert_eq!(
        status.signature(),
        vec!["SERVER_ERROR".to_string(), "502".to_string()]
    );

    let network = ProviderError::Network {
        provider: "openai".to_string(),
        message: "connection reset: ECONNRESET".to_string(),
    };
    assert_eq!(network.signature()[0], "NETWORK_ERROR");
    assert!(network.signature()[1].contains("ECONNRESET"));
}

#[test]
fn test_matches_any_uses_allow_list() {
    let list = allow_list(&["NETWORK_ERROR", "TIMEOUT", "429", "502", "503", "504"]);

    let bad_gateway = ProviderError::Status {
        provider: "openai".to_string(),
        model: None,
        status_code: 502,
        request_id: None,
        message: "bad gateway".to_string(),
    };
    assert!(bad_gateway.matches_any(&list));

    let internal = ProviderError::Status {
        provider: "openai".to_string(),
        model: None,
        status_code: 500,
        request_id: None,
        message: "boom".to_string(),
    };
    assert!(!internal.matches_any(&list));

    let aborted = ProviderError::Network {
        provider: "openai".to_string(),
        message: "socket hang up ECONNABORTED".to_string(),
    };
    assert!(aborted.matches_any(&allow_list(&["ECONNABORTED"])));
}

#[test]
fn test_fatal_kinds_never_match_allow_list() {
    let auth = ProviderError::Authentication {
        provider: "openai".to_string(),
        status_code: 401,
        request_id: None,
        message: "invalid key".to_string(),
    };
    assert!(!auth.matches_any(&allow_list(&["401", "AUTHENTICATION_ERROR"])));

    let open = ProviderError::CircuitOpen {
        provider: "openai".to_string(),
        retry_after_ms: 10,
    };
    assert!(!open.matches_any(&allow_list(&["CIRCUIT_OPEN"])));
}
