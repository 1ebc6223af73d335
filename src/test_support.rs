//! Blocking loopback HTTP server used by transport and adapter tests.

use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct MockResponse {
    status_code: u16,
    headers: Vec<(String, String)>,
    body: String,
    chunked: bool,
    hold_open: Option<Duration>,
}

impl MockResponse {
    pub(crate) fn new(status_code: u16, headers: Vec<(String, String)>, body: &str) -> Self {
        Self {
            status_code,
            headers,
            body: body.to_string(),
            chunked: false,
            hold_open: None,
        }
    }

    pub(crate) fn json(body: &str) -> Self {
        Self::new(
            200,
            vec![("content-type".to_string(), "application/json".to_string())],
            body,
        )
    }

    pub(crate) fn event_stream(body: &str) -> Self {
        Self::new(
            200,
            vec![("content-type".to_string(), "text/event-stream".to_string())],
            body,
        )
    }

    /// Sends `body` as a single chunk, then keeps the connection open for
    /// `hold_open` before terminating the chunked body.
    pub(crate) fn stalled_event_stream(body: &str, hold_open: Duration) -> Self {
        Self {
            chunked: true,
            hold_open: Some(hold_open),
            ..Self::event_stream(body)
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub request_line: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    pub(crate) fn json_body(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("captured request body should be json")
    }
}

pub(crate) struct MockServer {
    addr: std::net::SocketAddr,
    request_count: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    pub(crate) fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        listener
            .set_nonblocking(false)
            .expect("configure blocking listener");
        let addr = listener.local_addr().expect("listener addr");

        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let request_count = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));

        let queue_clone = Arc::clone(&queue);
        let request_count_clone = Arc::clone(&request_count);
        let captured_clone = Arc::clone(&captured);

        let handle = thread::spawn(move || {
            loop {
                let next_response = {
                    let mut queue = queue_clone.lock().expect("queue lock");
                    queue.pop_front()
                };

                let Some(response) = next_response else {
                    break;
                };

                let (mut stream, _) = listener.accept().expect("accept connection");
                stream
                    .set_read_timeout(Some(Duration::from_secs(3)))
                    .expect("set stream timeout");

                let raw = read_http_request(&mut stream);
                captured_clone
                    .lock()
                    .expect("captured lock")
                    .push(parse_request(&raw));
                request_count_clone.fetch_add(1, Ordering::SeqCst);

                // The client may hang up early (cancellation, timeout); write errors are expected then.
                let _ = write_response(&mut stream, &response);
            }
        });

        Self {
            addr,
            request_count,
            captured,
            handle: Some(handle),
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub(crate) fn captured(&self) -> Vec<CapturedRequest> {
        self.captured.lock().expect("captured lock").clone()
    }

    pub(crate) fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("join mock server");
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn write_response(stream: &mut std::net::TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\n",
        response.status_code,
        status_reason(response.status_code),
    );
    if response.chunked {
        head.push_str("Transfer-Encoding: chunked\r\n");
    } else {
        head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }
    for (name, value) in &response.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;

    if !response.chunked {
        stream.write_all(response.body.as_bytes())?;
        return stream.flush();
    }

    if !response.body.is_empty() {
        write!(stream, "{:x}\r\n{}\r\n", response.body.len(), response.body)?;
        stream.flush()?;
    }
    if let Some(hold_open) = response.hold_open {
        thread::sleep(hold_open);
    }
    stream.write_all(b"0\r\n\r\n")?;
    stream.flush()
}

fn read_http_request(stream: &mut std::net::TcpStream) -> String {
    let mut request = Vec::new();
    let mut chunk = [0_u8; 1024];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(bytes_read) => {
                request.extend_from_slice(&chunk[..bytes_read]);

                if let Some(header_end) =
                    request.windows(4).position(|window| window == b"\r\n\r\n")
                {
                    let headers = String::from_utf8_lossy(&request[..header_end]).to_string();
                    let content_length = headers
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            if name.eq_ignore_ascii_case("content-length") {
                                value.trim().parse::<usize>().ok()
                            } else {
                                None
                            }
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            Err(error)
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.kind() == std::io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(error) => panic!("failed reading request: {error}"),
        }
    }

    String::from_utf8_lossy(&request).to_string()
}

fn parse_request(raw_request: &str) -> CapturedRequest {
    let (head, body) = raw_request
        .split_once("\r\n\r\n")
        .unwrap_or((raw_request, ""));
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();

    CapturedRequest {
        request_line,
        headers,
        body: body.to_string(),
    }
}

fn status_reason(status_code: u16) -> &'static str {
    match status_code {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        529 => "Overloaded",
        _ => "Unknown",
    }
}

pub(crate) use scripted::{RecordingHandler, ScriptedAdapter, ScriptedReply};

mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    use crate::core::error::ProviderError;
    use crate::core::traits::{ProviderAdapter, StreamHandler};
    use crate::core::types::{
        FinishReason, HealthStatus, Message, NormalizedResponse, ProviderCapabilities,
        RequestOptions, Usage,
    };

    #[derive(Debug, Clone)]
    pub(crate) enum ScriptedReply {
        Text(String),
        Tokens(Vec<String>),
        /// Emits the tokens, then waits until the request is cancelled.
        TokensThenHang(Vec<String>),
        /// Emits the tokens, then fails with the error.
        TokensThenFail(Vec<String>, ProviderError),
        Fail(ProviderError),
    }

    /// In-process adapter that answers from a queue of scripted replies.
    pub(crate) struct ScriptedAdapter {
        name: String,
        replies: Mutex<VecDeque<ScriptedReply>>,
        calls: AtomicUsize,
        requests: Mutex<Vec<(Vec<Message>, RequestOptions)>>,
        healthy: AtomicBool,
    }

    impl ScriptedAdapter {
        pub(crate) fn new(name: &str, replies: Vec<ScriptedReply>) -> Self {
            Self {
                name: name.to_string(),
                replies: Mutex::new(VecDeque::from(replies)),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(true),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn requests(&self) -> Vec<(Vec<Message>, RequestOptions)> {
            self.requests.lock().expect("requests lock").clone()
        }

        pub(crate) fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }

        fn next_reply(&self, messages: &[Message], options: &RequestOptions) -> ScriptedReply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .expect("requests lock")
                .push((messages.to_vec(), options.clone()));
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| ScriptedReply::Text("ok".to_string()))
        }

        fn response(&self, content: String) -> NormalizedResponse {
            NormalizedResponse {
                id: format!("{}-response", self.name),
                content,
                model: format!("{}-model", self.name),
                usage: Some(Usage::new(5, 3)),
                finish_reason: FinishReason::Stop,
                timestamp: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                name: self.name.clone(),
                display_name: self.name.to_uppercase(),
                supports_streaming: true,
                supports_documents: true,
                max_tokens: 1_024,
                supported_models: vec![format!("{}-model", self.name)],
                default_model: format!("{}-model", self.name),
            }
        }

        async fn send_message(
            &self,
            messages: &[Message],
            options: &RequestOptions,
        ) -> Result<NormalizedResponse, ProviderError> {
            match self.next_reply(messages, options) {
                ScriptedReply::Text(text) => Ok(self.response(text)),
                ScriptedReply::Tokens(tokens) | ScriptedReply::TokensThenHang(tokens) => {
                    Ok(self.response(tokens.concat()))
                }
                ScriptedReply::TokensThenFail(_, error) => Err(error),
                ScriptedReply::Fail(error) => Err(error),
            }
        }

        async fn send_streaming_message(
            &self,
            messages: &[Message],
            handler: &dyn StreamHandler,
            options: &RequestOptions,
            cancel: &CancellationToken,
        ) -> Result<NormalizedResponse, ProviderError> {
            handler.on_start();
            let (tokens, hang, failure) = match self.next_reply(messages, options) {
                ScriptedReply::Text(text) => (vec![text], false, None),
                ScriptedReply::Tokens(tokens) => (tokens, false, None),
                ScriptedReply::TokensThenHang(tokens) => (tokens, true, None),
                ScriptedReply::TokensThenFail(tokens, error) => (tokens, false, Some(error)),
                ScriptedReply::Fail(error) => {
                    handler.on_error(&error);
                    return Err(error);
                }
            };

            let cancelled = || ProviderError::Cancelled {
                provider: self.name.clone(),
            };
            let mut content = String::new();
            for token in tokens {
                if cancel.is_cancelled() {
                    return Err(cancelled());
                }
                content.push_str(&token);
                handler.on_token(&token);
                tokio::task::yield_now().await;
            }

            if hang {
                cancel.cancelled().await;
                return Err(cancelled());
            }
            if let Some(error) = failure {
                handler.on_error(&error);
                return Err(error);
            }

            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            handler.on_complete(&content);
            Ok(self.response(content))
        }

        async fn check_health(&self) -> HealthStatus {
            let healthy = self.healthy.load(Ordering::SeqCst);
            HealthStatus {
                is_healthy: healthy,
                last_checked: Utc::now(),
                average_response_time_ms: Some(1),
                message: (!healthy).then(|| "scripted outage".to_string()),
            }
        }
    }

    /// Handler that records every callback for later assertions.
    #[derive(Default)]
    pub(crate) struct RecordingHandler {
        events: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        pub(crate) fn events(&self) -> Vec<String> {
            self.events.lock().expect("events lock").clone()
        }

        pub(crate) fn tokens(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|event| event.strip_prefix("token:").map(str::to_string))
                .collect()
        }

        fn record(&self, event: String) {
            self.events.lock().expect("events lock").push(event);
        }
    }

    impl StreamHandler for RecordingHandler {
        fn on_start(&self) {
            self.record("start".to_string());
        }

        fn on_token(&self, text: &str) {
            self.record(format!("token:{text}"));
        }

        fn on_complete(&self, full_text: &str) {
            self.record(format!("complete:{full_text}"));
        }

        fn on_error(&self, error: &ProviderError) {
            self.record(format!("error:{:?}", error.kind()));
        }
    }
}
