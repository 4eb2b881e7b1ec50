//! HTTP client for the chat relay
//!
//! Issues the `/api/chat` and `/api/chat/stream` requests, decodes NDJSON
//! bodies into deltas and optionally paces them for display.

use crate::protocol::{ChatCompletion, ChatCompletionDelta, ChatMessage};
use axum::body::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`ChatClient`]
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Relay answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Invalid response body: {0}")]
    Decode(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Stream of decoded deltas from the relay
pub type ClientDeltaStream = BoxStream<'static, ClientResult<ChatCompletionDelta>>;

/// Options for one chat request
#[derive(Debug, Clone)]
pub struct ChatRequestOptions {
    pub messages: Vec<ChatMessage>,
    /// Minimum spacing between streamed deltas; zero disables pacing
    pub chunk_interval: Duration,
    pub stream: bool,
}

impl ChatRequestOptions {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            chunk_interval: Duration::ZERO,
            stream: true,
        }
    }
}

/// Result of [`ChatClient::get_completion`]
pub enum CompletionOutcome {
    Complete(ChatCompletion),
    Stream(ClientDeltaStream),
}

#[derive(Serialize)]
struct RequestBody<'a> {
    messages: &'a [ChatMessage],
}

/// Client for a running relay
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_url: String,
}

impl ChatClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Send the request in the mode selected by `options.stream`
    pub async fn get_completion(
        &self,
        options: &ChatRequestOptions,
    ) -> ClientResult<CompletionOutcome> {
        if options.stream {
            let deltas = self.stream(&options.messages).await?;
            Ok(CompletionOutcome::Stream(paced(deltas, options.chunk_interval)))
        } else {
            let completion = self.complete(&options.messages).await?;
            Ok(CompletionOutcome::Complete(completion))
        }
    }

    /// POST `{api_url}/api/chat`
    pub async fn complete(&self, messages: &[ChatMessage]) -> ClientResult<ChatCompletion> {
        let response = self.post("/api/chat", messages).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// POST `{api_url}/api/chat/stream`
    pub async fn stream(&self, messages: &[ChatMessage]) -> ClientResult<ClientDeltaStream> {
        let response = self.post("/api/chat/stream", messages).await?;
        let url = response.url().to_string();
        let bytes = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|source| ClientError::Http {
                    url: url.clone(),
                    source,
                })
            })
            .boxed();
        Ok(ndjson_deltas(bytes))
    }

    async fn post(&self, path: &str, messages: &[ChatMessage]) -> ClientResult<reqwest::Response> {
        let url = format!("{}{}", self.api_url, path);
        let response = self
            .http
            .post(&url)
            .json(&RequestBody { messages })
            .send()
            .await
            .map_err(|source| ClientError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        Ok(response)
    }
}

struct LineState {
    bytes: BoxStream<'static, ClientResult<Bytes>>,
    buffer: Vec<u8>,
    queued: VecDeque<ClientResult<ChatCompletionDelta>>,
    finished: bool,
}

impl LineState {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode(&line);
        }
    }

    fn decode(&mut self, line: &[u8]) {
        match decode_line(line) {
            Ok(Some(delta)) => self.queued.push_back(Ok(delta)),
            Ok(None) => {}
            Err(e) => {
                self.queued.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// Decode one NDJSON line
///
/// Blank lines and objects without a `delta` yield `None`.
pub fn decode_line(line: &[u8]) -> ClientResult<Option<ChatCompletionDelta>> {
    let text = std::str::from_utf8(line).map_err(|e| ClientError::Decode(e.to_string()))?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ClientError::Decode(e.to_string()))?;
    if value.get("delta").is_none() {
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ClientError::Decode(e.to_string()))
}

/// Turn an NDJSON byte stream into deltas
///
/// A decode error is yielded once and ends the stream.
pub fn ndjson_deltas(bytes: BoxStream<'static, ClientResult<Bytes>>) -> ClientDeltaStream {
    let state = LineState {
        bytes,
        buffer: Vec::new(),
        queued: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queued.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.queued.push_back(Err(e));
                    state.finished = true;
                }
                None => {
                    let rest = std::mem::take(&mut state.buffer);
                    state.decode(&rest);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Delay each item by `interval` before yielding it
///
/// Order and count are preserved and at most one item is held at a time.
/// A zero interval returns the stream unchanged.
pub fn paced<T>(items: BoxStream<'static, T>, interval: Duration) -> BoxStream<'static, T>
where
    T: Send + 'static,
{
    if interval.is_zero() {
        return items;
    }

    items
        .then(move |item| async move {
            tokio::time::sleep(interval).await;
            item
        })
        .boxed()
}
