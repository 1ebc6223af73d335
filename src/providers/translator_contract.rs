use serde_json::Value;

use crate::core::error::ProviderError;
use crate::core::types::{Message, NormalizedResponse, RequestOptions, StreamAccumulator};

/// Outcome of decoding one event-stream payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamSignal {
    Token(String),
    /// Metadata was absorbed into the accumulator, or the event carries nothing.
    Continue,
    Done,
    /// The vendor reported a failure inside the stream.
    Failed(ProviderError),
}

/// Internal provider-layer translation contract.
///
/// `ProviderAdapter` remains the runtime-facing extension point (auth,
/// transport, resilience, capability declaration). Translators are pure:
/// they map conversation messages to a vendor wire body and vendor payloads
/// back to [`NormalizedResponse`].
pub(crate) trait ProviderTranslator: Send + Sync {
    /// Provider label carried by every error the translator produces.
    fn provider(&self) -> &'static str;

    fn encode_request(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        model: &str,
        stream: bool,
    ) -> Result<Value, ProviderError>;

    fn decode_response(
        &self,
        body: &Value,
        requested_model: &str,
    ) -> Result<NormalizedResponse, ProviderError>;

    /// Decodes one `data:` payload. Text deltas are returned as
    /// [`StreamSignal::Token`] and appended by the caller; metadata goes
    /// straight into `accumulator`. `Err` carries the reason a malformed
    /// payload was skipped.
    fn decode_stream_event(
        &self,
        event: Option<&str>,
        data: &str,
        requested_model: &str,
        accumulator: &mut StreamAccumulator,
    ) -> Result<StreamSignal, String>;
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{ProviderTranslator, StreamSignal};
    use crate::core::error::ProviderError;
    use crate::core::types::{Message, NormalizedResponse, RequestOptions, StreamAccumulator};

    struct EchoTranslator;

    impl ProviderTranslator for EchoTranslator {
        fn provider(&self) -> &'static str {
            "echo"
        }

        fn encode_request(
            &self,
            messages: &[Message],
            _options: &RequestOptions,
            model: &str,
            stream: bool,
        ) -> Result<Value, ProviderError> {
            Ok(json!({
                "model": model,
                "message_count": messages.len(),
                "stream": stream,
            }))
        }

        fn decode_response(
            &self,
            body: &Value,
            requested_model: &str,
        ) -> Result<NormalizedResponse, ProviderError> {
            let text = body
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Protocol {
                    provider: self.provider().to_string(),
                    model: Some(requested_model.to_string()),
                    message: "missing text".to_string(),
                })?;
            let mut accumulator = StreamAccumulator::new();
            accumulator.push_token(text);
            Ok(accumulator.finish(requested_model))
        }

        fn decode_stream_event(
            &self,
            _event: Option<&str>,
            data: &str,
            _requested_model: &str,
            _accumulator: &mut StreamAccumulator,
        ) -> Result<StreamSignal, String> {
            Ok(StreamSignal::Token(data.to_string()))
        }
    }

    #[test]
    fn test_provider_translator_trait_shape_encode_decode() {
        let translator = EchoTranslator;

        let encoded = translator
            .encode_request(
                &[Message::user("hello")],
                &RequestOptions::default(),
                "echo-1",
                true,
            )
            .expect("encode should succeed");
        assert_eq!(encoded["model"], json!("echo-1"));
        assert_eq!(encoded["message_count"], json!(1));
        assert_eq!(encoded["stream"], json!(true));

        let decoded = translator
            .decode_response(&json!({ "text": "done" }), "echo-1")
            .expect("decode should succeed");
        assert_eq!(decoded.content, "done");
        assert_eq!(decoded.model, "echo-1");
    }

    #[test]
    fn test_decode_failure_carries_provider_label() {
        let error = EchoTranslator
            .decode_response(&json!({}), "echo-1")
            .expect_err("missing text should fail");

        assert_eq!(
            error,
            ProviderError::Protocol {
                provider: "echo".to_string(),
                model: Some("echo-1".to_string()),
                message: "missing text".to_string(),
            }
        );
    }
}
