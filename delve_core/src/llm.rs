//! Text-generation capability and an OpenAI-compatible chat-completions client.

use crate::config::{LlmSettings, DEFAULT_SYNTHESIS_TIMEOUT_SECS};
use crate::error::LlmError;
use crate::prompts::ChatPrompt;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Incremental answer text.
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, LlmError>;

    async fn complete_stream(&self, prompt: &ChatPrompt) -> Result<TextStream, LlmError>;
}

pub struct OpenAiChatModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    request_timeout: Duration,
}

impl OpenAiChatModel {
    pub fn new(settings: &LlmSettings) -> Result<Self, LlmError> {
        let client = Client::builder()
            .user_agent(concat!("delve/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
            temperature: settings.temperature,
            request_timeout: Duration::from_secs(DEFAULT_SYNTHESIS_TIMEOUT_SECS),
        })
    }

    /// Bounds the wait for response headers, and for non-streaming calls the
    /// whole body too.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn transport_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            self.timed_out()
        } else {
            LlmError::HttpRequest(err)
        }
    }

    fn timed_out(&self) -> LlmError {
        LlmError::Timeout(format!(
            "{} did not respond within {:?}",
            self.model, self.request_timeout
        ))
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match &self.api_key {
            Some(key) => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", key))
                        .map_err(|e| LlmError::Authentication(e.to_string()))?,
                );
            }
            // Local OpenAI-compatible servers accept unauthenticated requests.
            None if self.base_url.contains("api.openai.com") => {
                return Err(LlmError::NotConfigured("OPENAI_API_KEY is not set".into()));
            }
            None => {}
        }
        Ok(headers)
    }

    fn body(&self, prompt: &ChatPrompt, stream: bool) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "stream": stream,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
        })
    }

    async fn send(&self, prompt: &ChatPrompt, stream: bool) -> Result<reqwest::Response, LlmError> {
        let headers = self.build_headers()?;
        let mut request = self
            .client
            .post(self.endpoint())
            .headers(headers)
            .json(&self.body(prompt, stream));
        // A streamed body may legitimately outlive the timeout; the caller
        // bounds the gap between chunks instead.
        if !stream {
            request = request.timeout(self.request_timeout);
        }
        let resp = match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(resp) => resp.map_err(|e| self.transport_error(e))?,
            Err(_) => return Err(self.timed_out()),
        };
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(classify_status(status, &text))
    }
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(300).collect());
    match status.as_u16() {
        401 | 403 => LlmError::Authentication(message),
        429 => LlmError::RateLimited(message),
        _ => LlmError::Upstream(format!("{} - {}", status, message)),
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, LlmError> {
        let value: Value = self
            .send(prompt, false)
            .await?
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        let content = value
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".into()))?;
        debug!(
            target: "delve.llm",
            model = %self.model,
            chars = content.len(),
            "completion received"
        );
        Ok(content.to_string())
    }

    async fn complete_stream(&self, prompt: &ChatPrompt) -> Result<TextStream, LlmError> {
        let resp = self.send(prompt, true).await?;
        debug!(target: "delve.llm", model = %self.model, "streaming completion started");
        Ok(sse_text_stream(resp.bytes_stream()))
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Error(String),
}

fn parse_sse_line(line: &str) -> Option<SseLine> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseLine::Done);
    }
    let value: Value = serde_json::from_str(data).ok()?;
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Some(SseLine::Error(message));
    }
    value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(|c| SseLine::Delta(c.to_string()))
}

struct SseState<S> {
    bytes: Pin<Box<S>>,
    buffer: String,
    pending: VecDeque<Result<String, LlmError>>,
    done: bool,
}

impl<S> SseState<S> {
    fn drain_lines(&mut self, flush: bool) {
        loop {
            let line = match self.buffer.find('\n') {
                Some(pos) => {
                    let line = self.buffer[..pos].trim().to_string();
                    self.buffer.drain(..=pos);
                    line
                }
                None if flush && !self.buffer.trim().is_empty() => std::mem::take(&mut self.buffer),
                None => return,
            };
            match parse_sse_line(line.trim()) {
                Some(SseLine::Delta(text)) => self.pending.push_back(Ok(text)),
                Some(SseLine::Done) => {
                    self.done = true;
                    return;
                }
                Some(SseLine::Error(message)) => {
                    self.pending.push_back(Err(LlmError::Upstream(message)));
                    self.done = true;
                    return;
                }
                None => {}
            }
        }
    }
}

/// Decode an OpenAI-style server-sent event body into content deltas. An
/// in-band error or a transport failure ends the stream with an `Err` item.
pub fn sse_text_stream<S, B>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        buffer: String::new(),
        pending: VecDeque::new(),
        done: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.push_str(&String::from_utf8_lossy(chunk.as_ref()));
                    state.drain_lines(false);
                }
                Some(Err(err)) => {
                    state.done = true;
                    state.pending.push_back(Err(LlmError::HttpRequest(err)));
                }
                None => {
                    state.drain_lines(true);
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send + 'static {
        let owned: Vec<Result<Vec<u8>, reqwest::Error>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures::stream::iter(owned)
    }

    /// Consume headers and the declared body so closing the socket does not reset it.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let declared = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + declared {
                    return;
                }
            }
        }
    }

    #[test]
    fn parses_delta_done_and_error_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            Some(SseLine::Delta("Hel".into()))
        );
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseLine::Done));
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"overloaded"}}"#),
            Some(SseLine::Error("overloaded".into()))
        );
        assert_eq!(parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
    }

    #[tokio::test]
    async fn stream_reassembles_split_lines() {
        let stream = sse_text_stream(chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Small \"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"caps\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]));
        let items: Vec<_> = stream.collect().await;
        let text: Vec<String> = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(text, vec!["Small ".to_string(), "caps".to_string()]);
    }

    #[tokio::test]
    async fn in_band_error_ends_stream() {
        let stream = sse_text_stream(chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n",
            "data: {\"error\":{\"message\":\"server overloaded\"}}\n",
        ]));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(LlmError::Upstream(m)) if m == "server overloaded"));
    }

    #[test]
    fn status_classification() {
        let body = r#"{"error":{"message":"Incorrect API key provided"}}"#;
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, body),
            LlmError::Authentication(m) if m == "Incorrect API key provided"
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            LlmError::Upstream(_)
        ));
    }

    #[tokio::test]
    async fn missing_key_for_hosted_api_is_not_configured() {
        let model = OpenAiChatModel::new(&LlmSettings::default()).unwrap();
        let err = model
            .complete(&ChatPrompt::new("s", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn complete_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let body = r#"{"choices":[{"message":{"role":"assistant","content":"[\"a\",\"b\"]"}}]}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        let settings = LlmSettings {
            base_url: format!("http://{}/v1/", addr),
            ..LlmSettings::default()
        };
        let model = OpenAiChatModel::new(&settings).unwrap();
        let text = model.complete(&ChatPrompt::new("s", "u")).await.unwrap();
        assert_eq!(text, r#"["a","b"]"#);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            // Hold the connection open without answering.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let settings = LlmSettings {
            base_url: format!("http://{}/v1", addr),
            ..LlmSettings::default()
        };
        let model = OpenAiChatModel::new(&settings)
            .unwrap()
            .with_request_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = model
            .complete_stream(&ChatPrompt::new("s", "u"))
            .await
            .err()
            .expect("silent server must not yield a stream");
        assert!(matches!(err, LlmError::Timeout(_)), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));

        let err = model.complete(&ChatPrompt::new("s", "u")).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)), "got {err:?}");
    }
}
