use serde_json::json;

use super::{
    decode_anthropic_response, decode_anthropic_stream_event, encode_anthropic_request,
    parse_anthropic_error_envelope,
};
use crate::core::error::{ErrorKind, ProviderError};
use crate::core::types::{
    ContextDocument, FinishReason, Message, RequestOptions, StreamAccumulator, Usage,
};
use crate::providers::translator_contract::StreamSignal;

const MODEL: &str = "claude-sonnet-4-5";

#[test]
fn test_encode_folds_system_prompt_into_top_level_field() {
    let options = RequestOptions {
        system_prompt: Some("S".to_string()),
        ..RequestOptions::default()
    };

    let body = encode_anthropic_request(&[Message::user("hi")], &options, MODEL, false)
        .expect("encode should succeed");

    assert_eq!(
        body,
        json!({
            "model": MODEL,
            "max_tokens": 4096,
            "system": "S",
            "messages": [{ "role": "user", "content": "hi" }],
            "stream": false,
        })
    );
}

#[test]
fn test_encode_joins_prompt_documents_and_system_messages() {
    let options = RequestOptions {
        system_prompt: Some("Be precise.".to_string()),
        context_documents: vec![ContextDocument {
            name: "w2.pdf".to_string(),
            doc_type: "pdf".to_string(),
            content: "Wages: 100".to_string(),
        }],
        temperature: Some(0.2),
        max_tokens: Some(256),
        ..RequestOptions::default()
    };
    let messages = vec![
        Message::system("Answer in English."),
        Message::user("hello"),
    ];

    let body = encode_anthropic_request(&messages, &options, MODEL, true)
        .expect("encode should succeed");

    let system = body["system"].as_str().expect("system string");
    let sections: Vec<&str> = system.split("\n\n").collect();
    assert_eq!(sections.first(), Some(&"Be precise."));
    assert!(system.contains("--- Document: w2.pdf (pdf) ---\nWages: 100\n--- End of w2.pdf ---"));
    assert_eq!(sections.last(), Some(&"Answer in English."));
    assert_eq!(body["max_tokens"], json!(256));
    assert_eq!(body["stream"], json!(true));
    assert!((body["temperature"].as_f64().expect("temperature") - 0.2).abs() < 1e-6);
    assert_eq!(body["messages"], json!([{ "role": "user", "content": "hello" }]));
}

#[test]
fn test_encode_merges_consecutive_same_role_messages() {
    let messages = vec![
        Message::user("first"),
        Message::user("second"),
        Message::assistant("reply"),
        Message::system("ignored position"),
        Message::assistant("more"),
    ];

    let body = encode_anthropic_request(&messages, &RequestOptions::default(), MODEL, false)
        .expect("encode should succeed");

    assert_eq!(
        body["messages"],
        json!([
            { "role": "user", "content": "first\n\nsecond" },
            { "role": "assistant", "content": "reply\n\nmore" },
        ])
    );
    assert_eq!(body["system"], json!("ignored position"));
}

#[test]
fn test_encode_rejects_system_only_conversation() {
    let error = encode_anthropic_request(
        &[Message::system("only system")],
        &RequestOptions::default(),
        MODEL,
        false,
    )
    .expect_err("no conversational messages");

    assert_eq!(error.kind(), ErrorKind::Protocol);
}

#[test]
fn test_decode_concatenates_text_blocks_and_maps_usage() {
    let body = json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "model": "claude-sonnet-4-5-20250929",
        "content": [
            { "type": "text", "text": "Hi " },
            { "type": "tool_use", "id": "t1", "name": "lookup", "input": {} },
            { "type": "text", "text": "there" }
        ],
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 12, "output_tokens": 4 }
    });

    let response = decode_anthropic_response(&body, MODEL).expect("decode should succeed");

    assert_eq!(response.id, "msg_01");
    assert_eq!(response.content, "Hi there");
    assert_eq!(response.model, "claude-sonnet-4-5-20250929");
    assert_eq!(response.usage, Some(Usage::new(12, 4)));
    assert_eq!(response.finish_reason, FinishReason::Stop);
}

#[test]
fn test_decode_maps_stop_reasons() {
    for (stop_reason, expected) in [
        ("end_turn", FinishReason::Stop),
        ("stop_sequence", FinishReason::Stop),
        ("max_tokens", FinishReason::Length),
        ("tool_use", FinishReason::ToolCalls),
        ("refusal", FinishReason::ContentFilter),
    ] {
        let body = json!({ "content": [], "stop_reason": stop_reason });
        let response = decode_anthropic_response(&body, MODEL).expect("decode should succeed");
        assert_eq!(response.finish_reason, expected, "stop_reason {stop_reason}");
    }
}

#[test]
fn test_decode_missing_content_is_protocol_error() {
    let error = decode_anthropic_response(&json!({ "id": "msg_01" }), MODEL)
        .expect_err("content is required");

    assert!(matches!(error, ProviderError::Protocol { .. }));
}

#[test]
fn test_stream_events_fill_accumulator() {
    let mut accumulator = StreamAccumulator::new();

    let start = decode_anthropic_stream_event(
        r#"{"type":"message_start","message":{"id":"msg_9","model":"claude-x","usage":{"input_tokens":7}}}"#,
        MODEL,
        &mut accumulator,
    );
    assert_eq!(start, Ok(StreamSignal::Continue));

    let delta = decode_anthropic_stream_event(
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
        MODEL,
        &mut accumulator,
    );
    assert_eq!(delta, Ok(StreamSignal::Token("Hel".to_string())));

    let ping = decode_anthropic_stream_event(r#"{"type":"ping"}"#, MODEL, &mut accumulator);
    assert_eq!(ping, Ok(StreamSignal::Continue));

    let message_delta = decode_anthropic_stream_event(
        r#"{"type":"message_delta","delta":{"stop_reason":"max_tokens"},"usage":{"output_tokens":3}}"#,
        MODEL,
        &mut accumulator,
    );
    assert_eq!(message_delta, Ok(StreamSignal::Continue));

    let stop = decode_anthropic_stream_event(r#"{"type":"message_stop"}"#, MODEL, &mut accumulator);
    assert_eq!(stop, Ok(StreamSignal::Done));

    let response = accumulator.finish(MODEL);
    assert_eq!(response.id, "msg_9");
    assert_eq!(response.model, "claude-x");
    assert_eq!(response.usage, Some(Usage::new(7, 3)));
    assert_eq!(response.finish_reason, FinishReason::Length);
}

#[test]
fn test_stream_error_event_maps_overloaded_to_retryable_status() {
    let mut accumulator = StreamAccumulator::new();

    let signal = decode_anthropic_stream_event(
        r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        MODEL,
        &mut accumulator,
    )
    .expect("error event decodes");

    let StreamSignal::Failed(error) = signal else {
        panic!("expected failure signal, got {signal:?}");
    };
    assert_eq!(error.status_code(), Some(529));
    assert_eq!(error.kind(), ErrorKind::Server);
    assert!(error.to_string().contains("overloaded_error: Overloaded"));
}

#[test]
fn test_stream_malformed_payload_is_reported_for_skipping() {
    let mut accumulator = StreamAccumulator::new();

    assert!(decode_anthropic_stream_event("{not json", MODEL, &mut accumulator).is_err());
    assert!(decode_anthropic_stream_event(r#"{"no_type":1}"#, MODEL, &mut accumulator).is_err());
}

#[test]
fn test_parse_error_envelope() {
    let envelope = parse_anthropic_error_envelope(
        r#"{"type":"error","error":{"type":"invalid_request_error","message":"prompt is too long"},"request_id":"req_1"}"#,
    )
    .expect("envelope should parse");

    assert_eq!(envelope.error_type.as_deref(), Some("invalid_request_error"));
    assert_eq!(envelope.message, "prompt is too long");
    assert_eq!(envelope.request_id.as_deref(), Some("req_1"));
    assert!(parse_anthropic_error_envelope("upstream exploded").is_none());
}
