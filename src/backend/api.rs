//! Backend that talks to an OpenAI-compatible chat-completions endpoint.

use futures_util::stream::{self, StreamExt};
use memchr::memchr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::stream::{error_stream, ChunkStream, TextChunk};
use super::{ApiErrorKind, BackendError};
use crate::api::{ChatCompletion, ChatMessage, ChatRequest, ChatResponse};
use crate::core::config::ApiConfig;
use crate::core::constants::API_CONNECT_TIMEOUT_SECS;
use crate::core::message::Message;
use crate::utils::url::{construct_api_url, resolve_base_url};

#[derive(Debug, Clone)]
pub struct ApiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key_env: String,
    timeout: Duration,
}

/// Everything needed to send one request, resolved up front so failures like a
/// missing key surface before any network traffic.
struct PreparedRequest {
    client: reqwest::Client,
    url: String,
    api_key: String,
    body: ChatRequest,
    timeout: Duration,
}

impl PreparedRequest {
    async fn send(self) -> Result<reqwest::Response, BackendError> {
        let timeout = self.timeout;
        let response = self
            .client
            .post(self.url)
            .header("Content-Type", "application/json")
            .bearer_auth(self.api_key)
            .timeout(timeout)
            .json(&self.body)
            .send()
            .await
            .map_err(|err| transport_error(err, timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        let kind = classify_status(status.as_u16());
        warn!(status = status.as_u16(), "API request rejected");
        Err(BackendError::api(kind, format_api_error(&body)))
    }
}

impl ApiBackend {
    pub fn new(config: &ApiConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(API_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|err| BackendError::api(ApiErrorKind::Transport, err.to_string()))?;
        Ok(Self {
            client,
            base_url: resolve_base_url(config.base_url.as_deref()),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            timeout: config.timeout(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> Result<String, BackendError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(BackendError::api(
                ApiErrorKind::Auth,
                format!("{} is not set", self.api_key_env),
            )),
        }
    }

    /// Only checks that credentials are present; no request is sent.
    pub async fn check_ready(&self) -> Result<(), BackendError> {
        self.api_key().map(|_| ())
    }

    fn prepare(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        stream: bool,
    ) -> Result<PreparedRequest, BackendError> {
        let api_key = self.api_key()?;
        Ok(PreparedRequest {
            client: self.client.clone(),
            url: construct_api_url(&self.base_url, "chat/completions"),
            api_key,
            body: ChatRequest {
                model: self.model.clone(),
                messages: build_messages(history, system_prompt),
                stream,
            },
            timeout: self.timeout,
        })
    }

    pub async fn respond(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let request = self.prepare(history, system_prompt, false)?;
        let timeout = self.timeout;
        debug!(model = %self.model, messages = history.len(), "Sending chat completion");

        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = async {
                let response = request.send().await?;
                let completion: ChatCompletion = response
                    .json()
                    .await
                    .map_err(|err| decode_error(err, timeout))?;
                completion.into_text().ok_or_else(|| {
                    BackendError::api(ApiErrorKind::Decode, "response contained no message")
                })
            } => result,
        }
    }

    pub fn stream(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> ChunkStream {
        let request = match self.prepare(history, system_prompt, true) {
            Ok(request) => request,
            Err(err) => return error_stream(err),
        };
        debug!(model = %self.model, messages = history.len(), "Streaming chat completion");

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let cancel_tx = tx.clone();
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = cancel_tx.send(Err(BackendError::Cancelled));
                }
                _ = pump_events(request, tx) => {}
            }
        });

        stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
        .boxed()
    }
}

type ChunkSender = mpsc::UnboundedSender<Result<TextChunk, BackendError>>;

async fn pump_events(request: PreparedRequest, tx: ChunkSender) {
    let timeout = request.timeout;
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            let _ = tx.send(Err(err));
            return;
        }
    };

    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = tx.send(Err(transport_error(err, timeout)));
                return;
            }
        };
        buffer.extend_from_slice(&bytes);

        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            let event = match std::str::from_utf8(&buffer[..newline_pos]) {
                Ok(line) => parse_sse_line(line.trim()),
                Err(err) => {
                    warn!(error = %err, "Skipping invalid UTF-8 in event stream");
                    SseEvent::Skip
                }
            };
            buffer.drain(..=newline_pos);

            match event {
                SseEvent::Skip => {}
                SseEvent::Chunk(text) => {
                    if tx.send(Ok(TextChunk::text(text))).is_err() {
                        return;
                    }
                }
                SseEvent::Done => return,
                SseEvent::Error(message) => {
                    let _ = tx.send(Err(BackendError::api(
                        ApiErrorKind::Status(500),
                        message,
                    )));
                    return;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Chunk(String),
    Done,
    Error(String),
    Skip,
}

fn parse_sse_line(line: &str) -> SseEvent {
    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
        return SseEvent::Skip;
    };
    if payload == "[DONE]" {
        return SseEvent::Done;
    }
    if payload.trim().is_empty() {
        return SseEvent::Skip;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseEvent::Chunk)
            .unwrap_or(SseEvent::Skip),
        Err(_) => SseEvent::Error(format_api_error(payload)),
    }
}

/// Builds the chat-completions message list: system prompt first, then each
/// message as the model originally saw it.
pub fn build_messages(history: &[Message], system_prompt: Option<&str>) -> Vec<ChatMessage> {
    let system = system_prompt
        .filter(|prompt| !prompt.trim().is_empty())
        .map(|prompt| ChatMessage {
            role: "system".to_string(),
            content: prompt.to_string(),
        });

    system
        .into_iter()
        .chain(history.iter().map(|message| ChatMessage {
            role: message.role.to_api_role().to_string(),
            content: message.model_text(),
        }))
        .collect()
}

fn classify_status(code: u16) -> ApiErrorKind {
    match code {
        401 | 403 => ApiErrorKind::Auth,
        429 => ApiErrorKind::RateLimit,
        code => ApiErrorKind::Status(code),
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout { after: timeout }
    } else {
        BackendError::api(ApiErrorKind::Transport, err.to_string())
    }
}

fn decode_error(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout { after: timeout }
    } else {
        BackendError::api(ApiErrorKind::Decode, err.to_string())
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .or_else(|| value.get("error").and_then(|v| v.as_str()))
        .or_else(|| value.get("message").and_then(|v| v.as_str()))?;

    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// One-line description of an error body, preferring the service's own message.
fn format_api_error(body: &str) -> String {
    const MAX_RAW_CHARS: usize = 300;

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty response>".to_string();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&value) {
            return summary;
        }
        return value.to_string();
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_RAW_CHARS {
        let mut cut: String = collapsed.chars().take(MAX_RAW_CHARS).collect();
        cut.push('…');
        cut
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::ToolCallRequest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn parse_sse_line_handles_spacing_variants() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#),
            SseEvent::Chunk("Hello".into())
        );
        assert_eq!(
            parse_sse_line(r#"data:{"choices":[{"delta":{"content":"World"}}]}"#),
            SseEvent::Chunk("World".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseEvent::Done);
        assert_eq!(parse_sse_line("data:[DONE]"), SseEvent::Done);
    }

    #[test]
    fn parse_sse_line_skips_comments_and_empty_deltas() {
        assert_eq!(parse_sse_line(": keep-alive"), SseEvent::Skip);
        assert_eq!(parse_sse_line(""), SseEvent::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            SseEvent::Skip
        );
    }

    #[test]
    fn parse_sse_line_routes_stream_errors() {
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"internal   server error"}}"#),
            SseEvent::Error("internal server error".into())
        );
    }

    #[test]
    fn format_api_error_prefers_summary() {
        let raw = r#"{"error":{"message":"model overloaded","type":"invalid_request_error"}}"#;
        assert_eq!(format_api_error(raw), "model overloaded");
        assert_eq!(format_api_error(r#"{"error":"bad key"}"#), "bad key");
        assert_eq!(format_api_error(r#"{"status":"failed"}"#), r#"{"status":"failed"}"#);
        assert_eq!(format_api_error("  api\n failure "), "api failure");
        assert_eq!(format_api_error(""), "<empty response>");
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert_eq!(classify_status(401), ApiErrorKind::Auth);
        assert_eq!(classify_status(403), ApiErrorKind::Auth);
        assert_eq!(classify_status(429), ApiErrorKind::RateLimit);
        assert_eq!(classify_status(502), ApiErrorKind::Status(502));
    }

    #[test]
    fn messages_start_with_system_prompt() {
        let call = ToolCallRequest::new("list_todos");
        let history = vec![
            Message::user("hi"),
            Message::assistant_with_calls("Checking.", vec![call]),
            Message::tool_result(&crate::core::message::ToolResult::success(
                "list_todos",
                "No todos found.",
            )),
        ];
        let messages = build_messages(&history, Some("Be brief."));
        let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert!(messages[2].content.contains("<tool_call name=\"list_todos\">"));
        assert!(messages[3].content.starts_with("<tool_result"));

        assert_eq!(build_messages(&history, Some("   ")).len(), 3);
    }

    fn backend_for(base_url: String, key_env: &str) -> ApiBackend {
        ApiBackend::new(&ApiConfig {
            base_url: Some(base_url),
            model: "test-model".into(),
            api_key_env: key_env.into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    /// Serves exactly one HTTP response and returns the raw request it saw.
    async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}/v1"), handle)
    }

    #[tokio::test]
    async fn missing_key_is_an_auth_error() {
        let backend = backend_for(
            "http://127.0.0.1:9/v1".into(),
            "PARLEY_TEST_KEY_THAT_IS_NEVER_SET",
        );
        let err = backend.check_ready().await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Api {
                kind: ApiErrorKind::Auth,
                ..
            }
        ));
        let items: Vec<_> = backend
            .stream(&[Message::user("hi")], None, &CancellationToken::new())
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().unwrap_err().is_persistent());
    }

    #[tokio::test]
    async fn stream_yields_deltas_in_order() {
        std::env::set_var("PARLEY_TEST_KEY_STREAM", "sk-test");
        let body = [
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
            "data: [DONE]",
            "",
        ]
        .join("\n\n");
        let (base_url, server) = serve_once("200 OK", body).await;
        let backend = backend_for(base_url, "PARLEY_TEST_KEY_STREAM");

        let items: Vec<_> = backend
            .stream(&[Message::user("hi")], Some("sys"), &CancellationToken::new())
            .collect()
            .await;
        let text: String = items.into_iter().map(|item| item.unwrap().text).collect();
        assert_eq!(text, "Hello");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains(r#""stream":true"#));
    }

    #[tokio::test]
    async fn rejected_request_maps_status() {
        std::env::set_var("PARLEY_TEST_KEY_RATE", "sk-test");
        let (base_url, server) = serve_once(
            "429 Too Many Requests",
            r#"{"error":{"message":"slow down"}}"#.to_string(),
        )
        .await;
        let backend = backend_for(base_url, "PARLEY_TEST_KEY_RATE");

        let err = backend
            .respond(&[Message::user("hi")], None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::api(ApiErrorKind::RateLimit, "slow down"));
        server.await.unwrap();
    }
}
