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
Anthropic Messages coverage:
- Mapped fields: model, max_tokens, messages/system, temperature, stream, text content blocks,
  stop_reason, usage.
- System text from options and system-role messages is folded into the top-level `system` string.
- Non-text response blocks (tool_use, thinking) carry no text and are skipped.
- Stream events: message_start, content_block_delta (text_delta), message_delta, message_stop,
  error. ping and block start/stop are ignored.
*/

pub(crate) const PROVIDER_NAME: &str = "anthropic";

const DEFAULT_MAX_TOKENS: u32 = 4096;
const BLOCK_SEPARATOR: &str = "\n\n";
const OVERLOADED_STATUS: u16 = 529;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AnthropicTranslator;

impl ProviderTranslator for AnthropicTranslator {
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
        encode_anthropic_request(messages, options, model, stream)
    }

    fn decode_response(
        &self,
        body: &Value,
        requested_model: &str,
    ) -> Result<NormalizedResponse, ProviderError> {
        decode_anthropic_response(body, requested_model)
    }

    fn decode_stream_event(
        &self,
        _event: Option<&str>,
        data: &str,
        requested_model: &str,
        accumulator: &mut StreamAccumulator,
    ) -> Result<StreamSignal, String> {
        decode_anthropic_stream_event(data, requested_model, accumulator)
    }
}

pub(crate) fn encode_anthropic_request(
    messages: &[Message],
    options: &RequestOptions,
    model: &str,
    stream: bool,
) -> Result<Value, ProviderError> {
    if model.trim().is_empty() {
        return Err(protocol_error(None, "model must not be empty"));
    }

    let system = fold_system_text(messages, options);
    let wire_messages = merge_consecutive_messages(
        messages
            .iter()
            .filter(|message| message.role != MessageRole::System)
            .map(|message| WireMessage {
                role: message.role.as_str(),
                content: message.content.clone(),
            })
            .collect(),
    );

    if wire_messages.is_empty() {
        return Err(protocol_error(Some(model), "empty messages"));
    }

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "max_tokens".to_string(),
        json!(options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );
    body.insert(
        "messages".to_string(),
        Value::Array(wire_messages.into_iter().map(WireMessage::into_json).collect()),
    );

    if let Some(system) = system {
        body.insert("system".to_string(), Value::String(system));
    }

    if let Some(temperature) = options.temperature {
        body.insert("temperature".to_string(), json!(temperature));
    }

    body.insert("stream".to_string(), Value::Bool(stream));

    Ok(Value::Object(body))
}

pub(crate) fn decode_anthropic_response(
    body: &Value,
    requested_model: &str,
) -> Result<NormalizedResponse, ProviderError> {
    let root = body
        .as_object()
        .ok_or_else(|| protocol_error(Some(requested_model), "anthropic response must be a JSON object"))?;

    let model = root
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(requested_model)
        .to_string();

    let content_blocks = root
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| protocol_error(Some(&model), "anthropic response missing content array"))?;

    let mut content = String::new();
    for block in content_blocks {
        if block.get("type").and_then(Value::as_str) == Some("text") {
            let text = block.get("text").and_then(Value::as_str).ok_or_else(|| {
                protocol_error(Some(&model), "text content block missing text")
            })?;
            content.push_str(text);
        }
    }

    let mut accumulator = StreamAccumulator::new();
    if let Some(id) = root.get("id").and_then(Value::as_str) {
        accumulator.set_id(id);
    }
    accumulator.set_model(model.as_str());
    accumulator.push_token(&content);
    if let Some(stop_reason) = root.get("stop_reason").and_then(Value::as_str) {
        accumulator.set_finish_reason(map_finish_reason(stop_reason));
    }

    let mut response = accumulator.finish(requested_model);
    response.usage = decode_usage(root.get("usage"));
    Ok(response)
}

pub(crate) fn decode_anthropic_stream_event(
    data: &str,
    requested_model: &str,
    accumulator: &mut StreamAccumulator,
) -> Result<StreamSignal, String> {
    let payload: Value =
        serde_json::from_str(data).map_err(|error| format!("invalid event json: {error}"))?;
    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "event missing type".to_string())?;

    match event_type {
        "message_start" => {
            let message = payload
                .get("message")
                .ok_or_else(|| "message_start missing message".to_string())?;
            if let Some(id) = message.get("id").and_then(Value::as_str) {
                accumulator.set_id(id);
            }
            if let Some(model) = message.get("model").and_then(Value::as_str) {
                accumulator.set_model(model);
            }
            if let Some(input_tokens) = message
                .get("usage")
                .and_then(|usage| usage.get("input_tokens"))
                .and_then(Value::as_u64)
            {
                accumulator.set_prompt_tokens(input_tokens);
            }
            Ok(StreamSignal::Continue)
        }
        "content_block_delta" => {
            let delta = payload
                .get("delta")
                .ok_or_else(|| "content_block_delta missing delta".to_string())?;
            match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") | None => delta
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|text| StreamSignal::Token(text.to_string()))
                    .ok_or_else(|| "text delta missing text".to_string()),
                Some(_) => Ok(StreamSignal::Continue),
            }
        }
        "message_delta" => {
            if let Some(stop_reason) = payload
                .get("delta")
                .and_then(|delta| delta.get("stop_reason"))
                .and_then(Value::as_str)
            {
                accumulator.set_finish_reason(map_finish_reason(stop_reason));
            }
            if let Some(output_tokens) = payload
                .get("usage")
                .and_then(|usage| usage.get("output_tokens"))
                .and_then(Value::as_u64)
            {
                accumulator.set_completion_tokens(output_tokens);
            }
            Ok(StreamSignal::Continue)
        }
        "message_stop" => Ok(StreamSignal::Done),
        "error" => Ok(StreamSignal::Failed(stream_error(
            &payload,
            requested_model,
        ))),
        _ => Ok(StreamSignal::Continue),
    }
}

pub(crate) fn parse_anthropic_error_envelope(body: &str) -> Option<VendorError> {
    let payload = serde_json::from_str::<Value>(body).ok()?;
    let root = payload.as_object()?;

    let error_obj = root.get("error")?.as_object()?;
    let message = error_obj
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)?;

    Some(VendorError {
        error_type: error_obj
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string),
        code: None,
        message,
        request_id: root
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn fold_system_text(messages: &[Message], options: &RequestOptions) -> Option<String> {
    let mut sections: Vec<String> = Vec::new();

    if let Some(system_prompt) = options
        .system_prompt
        .as_deref()
        .filter(|prompt| !prompt.trim().is_empty())
    {
        sections.push(system_prompt.to_string());
    }
    if let Some(documents) = render_context_documents(&options.context_documents) {
        sections.push(documents);
    }
    sections.extend(
        messages
            .iter()
            .filter(|message| message.role == MessageRole::System)
            .map(|message| message.content.clone()),
    );

    if sections.is_empty() {
        None
    } else {
        Some(sections.join(BLOCK_SEPARATOR))
    }
}

/// Mid-stream vendor errors arrive without an HTTP status, so the error type
/// picks the equivalent status class.
fn stream_error(payload: &Value, model: &str) -> ProviderError {
    let error = payload.get("error");
    let error_type = error
        .and_then(|error| error.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("error");
    let message = error
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("stream error")
        .to_string();
    let message = format!("{error_type}: {message}");

    match error_type {
        "overloaded_error" => ProviderError::Status {
            provider: PROVIDER_NAME.to_string(),
            model: Some(model.to_string()),
            status_code: OVERLOADED_STATUS,
            request_id: None,
            message,
        },
        "api_error" => ProviderError::Status {
            provider: PROVIDER_NAME.to_string(),
            model: Some(model.to_string()),
            status_code: 500,
            request_id: None,
            message,
        },
        "rate_limit_error" => ProviderError::RateLimited {
            provider: PROVIDER_NAME.to_string(),
            request_id: None,
            retry_after_secs: None,
            message,
        },
        _ => protocol_error(Some(model), message),
    }
}

fn map_finish_reason(stop_reason: &str) -> FinishReason {
    match stop_reason {
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn decode_usage(usage: Option<&Value>) -> Option<Usage> {
    let usage = usage?.as_object()?;
    let input_tokens = usage.get("input_tokens").and_then(Value::as_u64);
    let output_tokens = usage.get("output_tokens").and_then(Value::as_u64);

    match (input_tokens, output_tokens) {
        (None, None) => None,
        (input, output) => Some(Usage::new(input.unwrap_or(0), output.unwrap_or(0))),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl WireMessage {
    fn into_json(self) -> Value {
        json!({
            "role": self.role,
            "content": self.content,
        })
    }
}

fn merge_consecutive_messages(messages: Vec<WireMessage>) -> Vec<WireMessage> {
    let mut merged: Vec<WireMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        match merged.last_mut() {
            Some(previous) if previous.role == message.role => {
                previous.content.push_str(BLOCK_SEPARATOR);
                previous.content.push_str(&message.content);
            }
            _ => merged.push(message),
        }
    }

    merged
}

fn protocol_error(model: Option<&str>, message: impl Into<String>) -> ProviderError {
    ProviderError::Protocol {
        provider: PROVIDER_NAME.to_string(),
        model: model.map(str::to_string),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests;
