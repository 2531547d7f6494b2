//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Groq and any endpoint that
//! exposes `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Sampling knobs including frequency and presence penalties
//! - Health checks against `/models`

use async_trait::async_trait;
use dentcoach_core::error::ProviderError;
use dentcoach_core::message::Message;
use dentcoach_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    /// Build the JSON body shared by streaming and non-streaming calls.
    fn request_body(request: &ProviderRequest, stream: bool) -> ApiRequest<'_> {
        ApiRequest {
            model: &request.model,
            messages: Self::to_api_messages(&request.messages),
            params: &request.params,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
            stop: &request.stop,
        }
    }

    /// Map a non-200 upstream status to a provider error.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    async fn post(
        &self,
        body: &ApiRequest<'_>,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        Self::check_status(response).await
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.post(&body, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let usage = api_response.usage.map(Usage::from);

        Ok(ProviderResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            usage,
            model: api_response.model,
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(read_sse(response, tx, self.name.clone()));

        Ok(rx)
    }
}

type ChunkSender = tokio::sync::mpsc::Sender<Result<StreamChunk, ProviderError>>;

/// Forward an SSE body as chunks until `[DONE]`, a usage chunk, an error,
/// or the receiver is dropped.
///
/// Every exit other than a terminal chunk or a dropped receiver sends a
/// `StreamInterrupted` error, so a truncated reply never looks complete.
async fn read_sse(response: reqwest::Response, tx: ChunkSender, provider_name: String) {
    let mut byte_stream = response.bytes_stream();
    let mut lines = LineBuffer::default();

    loop {
        while let Some(line) = lines.next_line() {
            let event = match line {
                Ok(line) => parse_sse_line(&line),
                Err(e) => SseEvent::Unparseable(format!("invalid UTF-8 in stream: {e}")),
            };
            match event {
                SseEvent::Skip => {}
                SseEvent::Unparseable(err) | SseEvent::Failed(err) => {
                    warn!(provider = %provider_name, error = %err, "Completion stream failed");
                    let _ = tx.send(Err(ProviderError::StreamInterrupted(err))).await;
                    return;
                }
                SseEvent::Chunk(chunk) => {
                    let done = chunk.done;
                    if tx.send(Ok(chunk)).await.is_err() {
                        debug!(provider = %provider_name, "Stream receiver dropped");
                        return;
                    }
                    if done {
                        return;
                    }
                }
            }
        }

        if lines.is_finished() {
            break;
        }

        match byte_stream.next().await {
            Some(Ok(bytes)) => lines.push(&bytes),
            Some(Err(e)) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
            None => lines.finish(),
        }
    }

    warn!(provider = %provider_name, "Completion stream ended before [DONE]");
    let _ = tx
        .send(Err(ProviderError::StreamInterrupted(
            "stream ended before completion".into(),
        )))
        .await;
}

/// Splits raw bytes into lines, decoding each line only once it is complete
/// so multi-byte characters split across reads survive.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
    eof: bool,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Treat the unterminated tail as a final line.
    fn finish(&mut self) {
        self.eof = true;
    }

    fn is_finished(&self) -> bool {
        self.eof
    }

    fn next_line(&mut self) -> Option<Result<String, std::string::FromUtf8Error>> {
        let end = match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None if self.eof && !self.buf.is_empty() => self.buf.len(),
            None => return None,
        };
        let mut line: Vec<u8> = self.buf.drain(..end).collect();
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Some(String::from_utf8(line))
    }
}

/// Outcome of interpreting one line of an SSE body.
#[derive(Debug)]
enum SseEvent {
    /// Blank line, comment, non-data field, or a delta with nothing to emit
    Skip,
    Unparseable(String),
    /// The upstream reported an error inside the stream
    Failed(String),
    Chunk(StreamChunk),
}

fn parse_sse_line(line: &str) -> SseEvent {
    if line.is_empty() || line.starts_with(':') {
        return SseEvent::Skip;
    }

    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();

    // "[DONE]" signals end of stream
    if data == "[DONE]" {
        return SseEvent::Chunk(StreamChunk {
            done: true,
            ..StreamChunk::default()
        });
    }

    let stream_resp = match serde_json::from_str::<StreamResponse>(data) {
        Ok(resp) => resp,
        Err(e) => return SseEvent::Unparseable(e.to_string()),
    };

    if let Some(error) = stream_resp.error {
        return SseEvent::Failed(format!("upstream error: {}", error.message));
    }

    // Usage arrives in the final chunk when stream_options.include_usage is set
    if let Some(usage) = stream_resp.usage {
        let content = stream_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty());
        return SseEvent::Chunk(StreamChunk {
            content,
            done: true,
            usage: Some(usage.into()),
        });
    }

    match stream_resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty())
    {
        Some(content) => SseEvent::Chunk(StreamChunk {
            content: Some(content),
            done: false,
            usage: None,
        }),
        None => SseEvent::Skip,
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(flatten)]
    params: &'a GenerationParams,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(event: SseEvent) -> StreamChunk {
        match event {
            SseEvent::Chunk(c) => c,
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn openai_constructor() {
        let provider = OpenAiCompatProvider::openai("sk-test");
        assert_eq!(provider.name(), "openai");
        assert!(provider.base_url.contains("api.openai.com"));
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url.contains("localhost:11434"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("custom", "http://host/v1/", "k");
        assert_eq!(provider.base_url, "http://host/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn request_body_carries_penalties() {
        let request = ProviderRequest::new(
            "gpt-4o-mini",
            vec![Message::user("hi")],
            GenerationParams {
                temperature: 0.5,
                max_tokens: Some(800),
                top_p: None,
                frequency_penalty: Some(0.2),
                presence_penalty: Some(0.1),
            },
        );
        let body =
            serde_json::to_value(OpenAiCompatProvider::request_body(&request, true)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 800);
        assert!((body["frequency_penalty"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("top_p").is_none());
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn non_streaming_body_omits_stream_options() {
        let request =
            ProviderRequest::new("m", vec![Message::user("hi")], GenerationParams::default());
        let body =
            serde_json::to_value(OpenAiCompatProvider::request_body(&request, false)).unwrap();
        assert_eq!(body["stream"], false);
        assert!(body.get("stream_options").is_none());
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let c = chunk(parse_sse_line(line));
        assert_eq!(c.content.as_deref(), Some("Hello"));
        assert!(!c.done);
    }

    #[test]
    fn parse_stream_finish_chunk_is_skipped() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert!(matches!(parse_sse_line(line), SseEvent::Skip));
    }

    #[test]
    fn parse_stream_done_marker() {
        let c = chunk(parse_sse_line("data: [DONE]"));
        assert!(c.done);
        assert!(c.content.is_none());
    }

    #[test]
    fn parse_stream_usage() {
        let line = r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let c = chunk(parse_sse_line(line));
        assert!(c.done);
        let usage = c.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        assert!(matches!(parse_sse_line(""), SseEvent::Skip));
        assert!(matches!(parse_sse_line(": keep-alive"), SseEvent::Skip));
        assert!(matches!(parse_sse_line("event: ping"), SseEvent::Skip));
    }

    #[test]
    fn garbage_data_reported_unparseable() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            SseEvent::Unparseable(_)
        ));
    }

    #[test]
    fn upstream_error_event_reported_failed() {
        let line = r#"data: {"error":{"message":"overloaded","type":"server_error"}}"#;
        match parse_sse_line(line) {
            SseEvent::Failed(msg) => assert!(msg.contains("overloaded")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn line_buffer_waits_for_complete_lines() {
        let mut lines = LineBuffer::default();
        lines.push(b"data: caf\xC3");
        assert!(lines.next_line().is_none());
        lines.push(b"\xA9\r\ndata: tail");
        assert_eq!(lines.next_line().unwrap().unwrap(), "data: caf\u{e9}");
        assert!(lines.next_line().is_none());
        lines.finish();
        assert_eq!(lines.next_line().unwrap().unwrap(), "data: tail");
        assert!(lines.next_line().is_none());
    }

    #[test]
    fn data_prefix_without_space() {
        let line = r#"data:{"choices":[{"delta":{"content":"x"}}]}"#;
        assert_eq!(chunk(parse_sse_line(line)).content.as_deref(), Some("x"));
    }

    // --- Streaming against a local server ---

    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn delta_line(text: &str) -> Vec<u8> {
        let payload = serde_json::json!({"choices": [{"delta": {"content": text}}]});
        format!("data: {payload}\n\n").into_bytes()
    }

    /// Read one HTTP request (headers plus content-length body).
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + length {
                    return;
                }
            }
        }
    }

    async fn accept_and_start(listener: &TcpListener) -> TcpStream {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        socket
    }

    /// Serve a single SSE response written in separate pieces, then close.
    async fn serve_sse(pieces: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut socket = accept_and_start(&listener).await;
            for piece in pieces {
                socket.write_all(&piece).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });
        format!("http://{addr}/v1")
    }

    async fn open_stream(base_url: &str) -> ChunkReceiver {
        let provider = OpenAiCompatProvider::new("local", base_url, "sk-test");
        let request =
            ProviderRequest::new("m", vec![Message::user("hi")], GenerationParams::default());
        provider.stream(request).await.unwrap()
    }

    async fn drain(mut rx: ChunkReceiver) -> Result<String, ProviderError> {
        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            text.push_str(chunk.content.as_deref().unwrap_or_default());
            if chunk.done {
                return Ok(text);
            }
        }
        panic!("channel closed without a terminal chunk");
    }

    #[tokio::test]
    async fn complete_stream_is_reassembled() {
        let base = serve_sse(vec![
            delta_line("{\"response\":"),
            delta_line("\"ok\"}"),
            b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n".to_vec(),
            b"data: [DONE]\n\n".to_vec(),
        ])
        .await;
        assert_eq!(drain(open_stream(&base).await).await.unwrap(), "{\"response\":\"ok\"}");
    }

    #[tokio::test]
    async fn upstream_error_mid_stream_is_interrupted() {
        let base = serve_sse(vec![
            delta_line("{\"response\":\"half"),
            b"data: {\"error\":{\"message\":\"upstream exploded\"}}\n\n".to_vec(),
        ])
        .await;
        match drain(open_stream(&base).await).await {
            Err(ProviderError::StreamInterrupted(msg)) => assert!(msg.contains("upstream exploded")),
            other => panic!("expected interruption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_data_line_is_interrupted() {
        let base = serve_sse(vec![delta_line("partial"), b"data: {\"choices\": [\n\n".to_vec()]).await;
        assert!(matches!(
            drain(open_stream(&base).await).await,
            Err(ProviderError::StreamInterrupted(_))
        ));
    }

    #[tokio::test]
    async fn stream_closed_before_done_is_interrupted() {
        let base = serve_sse(vec![delta_line("{\"response\":\"trunc")]).await;
        assert!(matches!(
            drain(open_stream(&base).await).await,
            Err(ProviderError::StreamInterrupted(_))
        ));
    }

    #[tokio::test]
    async fn multibyte_char_split_across_reads() {
        let mut line = delta_line("caf\u{e9} \u{201c}ok\u{201d}");
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let tail = line.split_off(split);
        let base = serve_sse(vec![line, tail, b"data: [DONE]\n\n".to_vec()]).await;
        assert_eq!(
            drain(open_stream(&base).await).await.unwrap(),
            "caf\u{e9} \u{201c}ok\u{201d}"
        );
    }

    #[tokio::test]
    async fn dropping_receiver_releases_upstream_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/v1", listener.local_addr().unwrap());
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();

        // Keep streaming deltas until the client side goes away
        tokio::spawn(async move {
            let mut socket = accept_and_start(&listener).await;
            for _ in 0..500 {
                let written = socket.write_all(&delta_line("more ")).await;
                if written.is_err() || socket.flush().await.is_err() {
                    let _ = closed_tx.send(());
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let mut rx = open_stream(&base).await;
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("more "));
        drop(rx);

        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .expect("reader task kept the upstream connection open")
            .unwrap();
    }
}
