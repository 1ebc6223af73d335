use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{ProviderAdapter, StreamHandler};
use crate::core::error::ProviderError;
use crate::core::types::{Message, RequestOptions};
use crate::test_support::{RecordingHandler, ScriptedAdapter, ScriptedReply};

struct TokenOnlyHandler;

impl StreamHandler for TokenOnlyHandler {
    fn on_token(&self, _text: &str) {}

    fn on_complete(&self, _full_text: &str) {}

    fn on_error(&self, _error: &ProviderError) {}
}

#[test]
fn test_stream_handler_on_start_defaults_to_noop() {
    let handler: &dyn StreamHandler = &TokenOnlyHandler;
    handler.on_start();
}

#[tokio::test]
async fn test_provider_adapter_is_object_safe_and_dispatches() {
    let adapter: Arc<dyn ProviderAdapter> = Arc::new(ScriptedAdapter::new(
        "mock",
        vec![
            ScriptedReply::Text("hello".to_string()),
            ScriptedReply::Tokens(vec!["a".to_string(), "b".to_string()]),
        ],
    ));

    assert_eq!(adapter.name(), "mock");
    assert!(adapter.circuit_metrics().is_none());

    let response = adapter
        .send_message(&[Message::user("hi")], &RequestOptions::default())
        .await
        .expect("scripted reply");
    assert_eq!(response.content, "hello");

    let handler = RecordingHandler::default();
    let streamed = adapter
        .send_streaming_message(
            &[Message::user("hi")],
            &handler,
            &RequestOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("scripted stream");

    assert_eq!(streamed.content, "ab");
    assert_eq!(
        handler.events(),
        vec!["start", "token:a", "token:b", "complete:ab"]
    );
}
