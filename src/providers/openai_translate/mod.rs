use serde_json::{Map, Value, json};

use crate::core::error::ProviderError;
use crate::core::types::{
    FinishReason, Message, MessageRole, NormalizedResponse, RequestOptions, StreamAccumulator,
    Usage,
};
use crate::providers::render_context_documents;
use crate::providers::translator_contract::{ProviderTranslator, StreamSignal};
use crate::transport::http::VendorError;

/*
OpenAI Chat Completions coverage:
- Mapped fields: model, messages (system/user/assistant), max_tokens, temperature, stream,
  stream_options.include_usage, choices[0].message.content, finish_reason, usage.
- System prompt and document context become leading system-role messages.
- Stream chunks: choices[0].delta.content tokens, choices[0].finish_reason, trailing usage chunk,
  in-band `error` objects. The `[DONE]` sentinel is handled by the event-stream decoder.
*/

pub(crate) const PROVIDER_NAME: &str = "openai";

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct OpenAiTranslator;

impl ProviderTranslator for OpenAiTranslator {
    fn provider(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn encode_request(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        model: &str,
        stream: bool,
    ) -> Result<Value, ProviderError> {
        encode_openai_request(messages, options, model, stream)
    }

    fn decode_response(
        &self,
        body: &Value,
        requested_model: &str,
    ) -> Result<NormalizedResponse, ProviderError> {
        decode_openai_response(body, requested_model)
    }

    fn decode_stream_event(
        &self,
        _event: Option<&str>,
        data: &str,
        requested_model: &str,
        accumulator: &mut StreamAccumulator,
    ) -> Result<StreamSignal, String> {
        decode_openai_stream_chunk(data, requested_model, accumulator)
    }
}

pub(crate) fn encode_openai_request(
    messages: &[Message],
    options: &RequestOptions,
    model: &str,
    stream: bool,
) -> Result<Value, ProviderError> {
    if model.trim().is_empty() {
        return Err(protocol_error(None, "model must not be empty"));
    }
    if messages.is_empty() {
        return Err(protocol_error(Some(model), "empty messages"));
    }

    let mut wire_messages = Vec::with_capacity(messages.len() + 2);
    if let Some(system_prompt) = options
        .system_prompt
        .as_deref()
        .filter(|prompt| !prompt.trim().is_empty())
    {
        wire_messages.push(wire_message(MessageRole::System, system_prompt));
    }
    if let Some(documents) = render_context_documents(&options.context_documents) {
        wire_messages.push(wire_message(MessageRole::System, &documents));
    }
    wire_messages.extend(
        messages
            .iter()
            .map(|message| wire_message(message.role, &message.content)),
    );

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("messages".to_string(), Value::Array(wire_messages));

    if let Some(max_tokens) = options.max_tokens {
        body.insert("max_tokens".to_string(), json!(max_tokens));
    }

    if let Some(temperature) = options.temperature {
        body.insert("temperature".to_string(), json!(temperature));
    }

    body.insert("stream".to_string(), Value::Bool(stream));
    if stream {
        body.insert(
            "stream_options".to_string(),
            json!({ "include_usage": true }),
        );
    }

    Ok(Value::Object(body))
}

pub(crate) fn decode_openai_response(
    body: &Value,
    requested_model: &str,
) -> Result<NormalizedResponse, ProviderError> {
    let root = body.as_object().ok_or_else(|| {
        protocol_error(Some(requested_model), "openai response must be a JSON object")
    })?;

    if let Some(error) = parse_openai_error_value(root) {
        return Err(protocol_error(
            Some(requested_model),
            format_openai_error_message(&error),
        ));
    }

    let choice = root
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| protocol_error(Some(requested_model), "openai response missing choices"))?;
    let message = choice
        .get("message")
        .and_then(Value::as_object)
        .ok_or_else(|| protocol_error(Some(requested_model), "openai choice missing message"))?;

    let mut accumulator = StreamAccumulator::new();
    if let Some(id) = root.get("id").and_then(Value::as_str) {
        accumulator.set_id(id);
    }
    if let Some(model) = root.get("model").and_then(Value::as_str) {
        accumulator.set_model(model);
    }
    // `content` is null for refusals and pure tool-call turns.
    if let Some(content) = message.get("content").and_then(Value::as_str) {
        accumulator.push_token(content);
    }
    if let Some(finish_reason) = choice.get("finish_reason").and_then(Value::as_str) {
        accumulator.set_finish_reason(map_finish_reason(finish_reason));
    }

    let mut response = accumulator.finish(requested_model);
    response.usage = decode_usage(root.get("usage"));
    Ok(response)
}

pub(crate) fn decode_openai_stream_chunk(
    data: &str,
    requested_model: &str,
    accumulator: &mut StreamAccumulator,
) -> Result<StreamSignal, String> {
    let payload: Value =
        serde_json::from_str(data).map_err(|error| format!("invalid chunk json: {error}"))?;
    let root = payload
        .as_object()
        .ok_or_else(|| "chunk must be a JSON object".to_string())?;

    if let Some(error) = parse_openai_error_value(root) {
        return Ok(StreamSignal::Failed(protocol_error(
            Some(requested_model),
            format_openai_error_message(&error),
        )));
    }

    if let Some(id) = root.get("id").and_then(Value::as_str) {
        accumulator.set_id(id);
    }
    if let Some(model) = root.get("model").and_then(Value::as_str) {
        accumulator.set_model(model);
    }
    if let Some(usage) = decode_usage(root.get("usage")) {
        accumulator.set_prompt_tokens(usage.prompt_tokens);
        accumulator.set_completion_tokens(usage.completion_tokens);
    }

    let Some(choice) = root
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        return Ok(StreamSignal::Continue);
    };

    if let Some(finish_reason) = choice.get("finish_reason").and_then(Value::as_str) {
        accumulator.set_finish_reason(map_finish_reason(finish_reason));
    }

    match choice
        .get("delta")
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
    {
        Some(text) => Ok(StreamSignal::Token(text.to_string())),
        None => Ok(StreamSignal::Continue),
    }
}

pub(crate) fn parse_openai_error_envelope(body: &str) -> Option<VendorError> {
    let payload = serde_json::from_str::<Value>(body).ok()?;
    parse_openai_error_value(payload.as_object()?)
}

fn parse_openai_error_value(root: &Map<String, Value>) -> Option<VendorError> {
    let error = root.get("error")?.as_object()?;
    let message = value_to_string(error.get("message"))
        .unwrap_or_else(|| "openai response reported an error".to_string());

    Some(VendorError {
        error_type: value_to_string(error.get("type")),
        code: value_to_string(error.get("code")),
        message,
        request_id: None,
    })
}

fn format_openai_error_message(error: &VendorError) -> String {
    match (&error.error_type, &error.code) {
        (Some(error_type), Some(code)) => {
            format!("{error_type}: {} [code={code}]", error.message)
        }
        (Some(error_type), None) => format!("{error_type}: {}", error.message),
        (None, Some(code)) => format!("{} [code={code}]", error.message),
        (None, None) => error.message.clone(),
    }
}

fn wire_message(role: MessageRole, content: &str) -> Value {
    json!({
        "role": role.as_str(),
        "content": content,
    })
}

fn map_finish_reason(finish_reason: &str) -> FinishReason {
    match finish_reason {
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

fn decode_usage(usage: Option<&Value>) -> Option<Usage> {
    let usage = usage?.as_object()?;
    let prompt_tokens = usage.get("prompt_tokens").and_then(Value::as_u64);
    let completion_tokens = usage.get("completion_tokens").and_then(Value::as_u64);

    match (prompt_tokens, completion_tokens) {
        (None, None) => None,
        (prompt, completion) => {
            let mut decoded = Usage::new(prompt.unwrap_or(0), completion.unwrap_or(0));
            if let Some(total_tokens) = usage.get("total_tokens").and_then(Value::as_u64) {
                decoded.total_tokens = total_tokens;
            }
            Some(decoded)
        }
    }
}

fn value_to_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    }
}

fn protocol_error(model: Option<&str>, message: impl Into<String>) -> ProviderError {
    ProviderError::Protocol {
        provider: PROVIDER_NAME.to_string(),
        model: model.map(str::to_string),
        message: message.into(),
    }
}
