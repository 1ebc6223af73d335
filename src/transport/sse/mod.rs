//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes may arrive split anywhere, including inside a UTF-8 sequence, so
//! only complete lines are decoded. `data:` lines accumulate until a blank
//! line dispatches them as one event, joined with `\n`.

use tracing::debug;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data { event: Option<String>, data: String },
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = self.decode_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever is left once the body has ended, dispatching an
    /// event that never saw its closing blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            events.extend(self.decode_line(&line));
        }
        events.extend(self.dispatch());
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let data = self.data.take()?;
        if data.trim() == DONE_SENTINEL {
            return Some(SseEvent::Done);
        }
        Some(SseEvent::Data { event, data })
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<SseEvent> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(error) => {
                debug!(error = %error, "skipping non-utf8 event stream line");
                return None;
            }
        };

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event = Some(value.to_string());
                None
            }
            "data" => {
                if let Some(data) = self.data.as_mut() {
                    data.push('\n');
                    data.push_str(value);
                } else {
                    self.data = Some(value.to_string());
                }
                None
            }
            "id" | "retry" => None,
            _ => {
                debug!(line, "skipping unrecognized event stream line");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests;
