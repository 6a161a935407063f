//! HTTP client for OpenAI-compatible chat completion APIs.
//!
//! Omits the Authorization header when no key is configured, for local
//! servers that don't require authentication.

use super::retry::RetryPolicy;
use super::sse::{parse_chunk, SseDecoder};
use super::{ChunkStream, CompletionService};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::types::{ChatRequest, ChatResponse, StreamChunk};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Client for OpenAI-compatible model APIs.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    /// Build a client from resolved API configuration.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        Self::with_retry_policy(config, RetryPolicy::default())
    }

    pub fn with_retry_policy(config: &ApiConfig, retry_policy: RetryPolicy) -> Result<Self, ApiError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ApiError::Misconfigured(format!(
                "base_url `{}` must start with http:// or https://",
                config.base_url
            )));
        }
        Ok(Self {
            http: build_http_client(Duration::from_secs(config.timeout_secs.max(1))),
            base_url,
            api_key: config.api_key.trim().to_string(),
            retry_policy,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Send once, mapping non-2xx statuses to [`ApiError::Status`].
    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, ApiError> {
        let mut req = self.http.post(self.endpoint()).json(request);
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { code, body });
        }
        Ok(response)
    }

    async fn send_with_retries(&self, request: &ChatRequest) -> Result<reqwest::Response, ApiError> {
        let mut attempt: u32 = 0;
        loop {
            match self.send(request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !self.retry_policy.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = self.retry_policy.delay_for(attempt);
                    warn!(attempt, ?delay, error = %err, "completion request failed; retrying");
                    attempt = attempt.saturating_add(1);
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Build an HTTP client with timeout applied.
fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Stream state: the byte source, the framer, and parsed chunks not yet yielded.
struct StreamState<S> {
    bytes: S,
    decoder: SseDecoder,
    ready: VecDeque<Result<StreamChunk, ApiError>>,
    done: bool,
}

/// Parse framed events into `ready`; true once the stream is finished.
fn decode_events(events: Vec<String>, ready: &mut VecDeque<Result<StreamChunk, ApiError>>) -> bool {
    for data in events {
        match parse_chunk(&data) {
            Ok(Some(chunk)) => ready.push_back(Ok(chunk)),
            Ok(None) => return true,
            Err(err) => {
                ready.push_back(Err(err));
                return true;
            }
        }
    }
    false
}

/// Turn a body byte stream into parsed chunks, preserving arrival order.
fn chunk_stream<S, B>(bytes: S) -> ChunkStream
where
    S: futures::Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
{
    let state = StreamState {
        bytes,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push(bytes.as_ref());
                    state.done = decode_events(events, &mut state.ready);
                }
                Some(Err(err)) => {
                    state.ready.push_back(Err(ApiError::Http(err)));
                    state.done = true;
                }
                None => {
                    let tail: Vec<String> = state.decoder.finish().into_iter().collect();
                    decode_events(tail, &mut state.ready);
                    state.done = true;
                }
            }
        }
    }))
}

#[async_trait]
impl CompletionService for ApiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let mut request = request.clone();
        request.stream = false;
        let response = self.send_with_retries(&request).await?;
        let parsed = response.json::<ChatResponse>().await?;
        debug!(id = %parsed.id, choices = parsed.choices.len(), "completion received");
        Ok(parsed)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream, ApiError> {
        let mut request = request.clone();
        request.stream = true;
        let response = self.send_with_retries(&request).await?;
        Ok(chunk_stream(Box::pin(response.bytes_stream())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::sse_data_block;
    use crate::types::{ChatMessage, MessageAssembler};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "dummy-model".into(),
            messages: vec![ChatMessage::user("hello")],
            tools: None,
            temperature: None,
            stream: false,
        }
    }

    fn config(addr: std::net::SocketAddr, key: &str) -> ApiConfig {
        ApiConfig {
            base_url: format!("http://{addr}/v1/"),
            api_key: key.into(),
            model: "dummy-model".into(),
            timeout_secs: 3,
            ..ApiConfig::default()
        }
    }

    fn http_response(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Read headers plus a Content-Length body.
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).to_string()
    }

    /// Serve the given responses to consecutive connections; returns the raw requests.
    fn serve(listener: TcpListener, responses: Vec<String>) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().await.expect("accept");
                seen.push(read_request(&mut stream).await);
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
            seen
        })
    }

    #[test]
    fn rejects_non_http_base_url() {
        let config = ApiConfig {
            base_url: "localhost:8080".into(),
            ..ApiConfig::default()
        };
        let err = ApiClient::new(&config).err().expect("misconfigured");
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn complete_parses_json_and_sends_bearer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = r#"{"id":"ok","choices":[{"index":0,"message":{"role":"assistant","content":"done"},"finish_reason":"stop"}]}"#;
        let server = serve(listener, vec![http_response("200 OK", "application/json", body)]);

        let client = ApiClient::new(&config(addr, "sk-test")).unwrap();
        let response = client.complete(&request()).await.unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("done"));

        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("POST /v1/chat/completions"), "{}", seen[0]);
        assert!(seen[0].to_ascii_lowercase().contains("authorization: bearer sk-test"));
    }

    #[tokio::test]
    async fn empty_key_omits_authorization() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"x"},"finish_reason":"stop"}]}"#;
        let server = serve(listener, vec![http_response("200 OK", "application/json", body)]);

        let client = ApiClient::new(&config(addr, "")).unwrap();
        client.complete(&request()).await.unwrap();
        let seen = server.await.unwrap();
        assert!(!seen[0].to_ascii_lowercase().contains("authorization"));
    }

    #[tokio::test]
    async fn transient_status_is_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"recovered"},"finish_reason":"stop"}]}"#;
        let server = serve(
            listener,
            vec![
                http_response("503 Service Unavailable", "text/plain", "busy"),
                http_response("200 OK", "application/json", body),
            ],
        );
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        };
        let client = ApiClient::with_retry_policy(&config(addr, ""), policy).unwrap();
        let response = client.complete(&request()).await.unwrap();
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("recovered")
        );
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve(
            listener,
            vec![http_response("401 Unauthorized", "text/plain", "bad key")],
        );
        let client = ApiClient::new(&config(addr, "k")).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        match &err {
            ApiError::Status { code, body } => {
                assert_eq!(*code, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("expected status error, got {other}"),
        }
        assert!(err.is_fatal());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn stream_assembles_sse_chunks_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sse = [
            sse_data_block(r#"{"choices":[{"delta":{"role":"assistant","content":"Cre"}}]}"#),
            sse_data_block(r#"{"choices":[{"delta":{"content":"ating"}}]}"#),
            sse_data_block(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"create_object","arguments":"{\"kind\":"}}]}}]}"#,
            ),
            sse_data_block(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"cube\"}"}}]},"finish_reason":"tool_calls"}]}"#,
            ),
            sse_data_block("[DONE]"),
        ]
        .concat();
        let server = serve(
            listener,
            vec![http_response("200 OK", "text/event-stream", &sse)],
        );

        let client = ApiClient::new(&config(addr, "")).unwrap();
        let mut chunks = client.stream(&request()).await.unwrap();
        let mut assembler = MessageAssembler::new();
        let mut count = 0;
        while let Some(chunk) = chunks.next().await {
            assembler.apply(&chunk.unwrap());
            count += 1;
        }
        assert_eq!(count, 4);
        let message = assembler.finish();
        assert_eq!(message.content.as_deref(), Some("Creating"));
        let calls = message.requested_calls();
        assert_eq!(calls[0].function.name, "create_object");
        assert_eq!(calls[0].function.arguments, r#"{"kind":"cube"}"#);

        let seen = server.await.unwrap();
        assert!(seen[0].contains(r#""stream":true"#), "{}", seen[0]);
    }

    #[tokio::test]
    async fn chunk_stream_surfaces_malformed_chunk_and_stops() {
        let parts: Vec<Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(sse_data_block(r#"{"choices":[{"delta":{"content":"a"}}]}"#).into_bytes()),
            Ok(sse_data_block("{oops").into_bytes()),
            Ok(sse_data_block(r#"{"choices":[{"delta":{"content":"b"}}]}"#).into_bytes()),
        ];
        let items: Vec<_> = chunk_stream(stream::iter(parts)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ApiError::InvalidResponse(_))));
    }
}
