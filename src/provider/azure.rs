//! Azure OpenAI chat completions provider

use super::credential::TokenCredential;
use super::sse::{SseBuffer, SseEvent, chunk_content, parse_block};
use super::{CompletionProvider, CompletionRequest, ContentStream};
use crate::config::{ApiKey, ProviderConfig};
use crate::error::{AppError, AppResult};
use crate::protocol::ChatMessage;
use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// How requests to the deployment are authenticated
#[derive(Clone)]
pub enum UpstreamAuth {
    /// `api-key` header
    ApiKey(ApiKey),
    /// `Authorization: Bearer` from a credential
    Token(Arc<dyn TokenCredential>),
}

impl std::fmt::Debug for UpstreamAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey"),
            Self::Token(_) => f.write_str("Token"),
        }
    }
}

#[derive(Debug, Serialize)]
struct UpstreamRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f64,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct UpstreamCompletion {
    #[serde(default)]
    choices: Vec<UpstreamChoice>,
}

#[derive(Debug, Deserialize)]
struct UpstreamChoice {
    message: UpstreamMessage,
}

#[derive(Debug, Deserialize)]
struct UpstreamMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Provider for one Azure OpenAI deployment
#[derive(Debug)]
pub struct AzureOpenAiProvider {
    http: reqwest::Client,
    endpoint: String,
    url: String,
    temperature: f64,
    auth: UpstreamAuth,
}

impl AzureOpenAiProvider {
    pub fn new(config: &ProviderConfig, auth: UpstreamAuth) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint, config.deployment, config.api_version
        );

        Ok(Self {
            http,
            endpoint,
            url,
            temperature: config.temperature,
            auth,
        })
    }

    /// Full chat completions URL for the deployment
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> AppResult<reqwest::Response> {
        let body = UpstreamRequest {
            messages: &request.messages,
            temperature: self.temperature,
            stream,
            user: request.user.as_deref(),
        };

        let builder = self.http.post(&self.url).json(&body);
        let builder = match &self.auth {
            UpstreamAuth::ApiKey(key) => builder.header("api-key", key.expose()),
            UpstreamAuth::Token(credential) => {
                let token = credential.get_token().await?;
                builder.bearer_auth(token.token)
            }
        };

        let response = builder.send().await.map_err(|e| self.call_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(self.call_error(format!("HTTP {}: {}", status, snippet)));
        }

        Ok(response)
    }

    fn call_error(&self, reason: impl std::fmt::Display) -> AppError {
        AppError::UpstreamCall {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl CompletionProvider for AzureOpenAiProvider {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn complete(&self, request: &CompletionRequest) -> AppResult<String> {
        let response = self.send(request, false).await?;

        let completion: UpstreamCompletion = response
            .json()
            .await
            .map_err(|e| self.call_error(format!("invalid completion body: {}", e)))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.call_error("completion contained no choices"))?;

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn stream_complete(&self, request: &CompletionRequest) -> AppResult<ContentStream> {
        let response = self.send(request, true).await?;
        Ok(content_stream(
            response.bytes_stream().boxed(),
            self.endpoint.clone(),
        ))
    }
}

type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

struct StreamState {
    bytes: ByteStream,
    buffer: SseBuffer,
    queued: VecDeque<String>,
    failure: Option<AppError>,
    finished: bool,
    received: usize,
    endpoint: String,
}

impl StreamState {
    /// Decode buffered blocks until the buffer runs dry, `[DONE]` or an error
    fn drain_blocks(&mut self) {
        while let Some(block) = self.buffer.next_block() {
            self.ingest(&block);
            if self.finished {
                return;
            }
        }
    }

    fn ingest(&mut self, block: &str) {
        match parse_block(block) {
            SseEvent::Done => self.finished = true,
            SseEvent::Ignored => {}
            SseEvent::Data(data) => match chunk_content(&data) {
                Ok(content) => self.queued.push_back(content),
                Err(e) => self.fail(e),
            },
        }
    }

    fn fail(&mut self, reason: impl std::fmt::Display) {
        self.finished = true;
        self.failure = Some(AppError::StreamInterrupted {
            endpoint: self.endpoint.clone(),
            deltas_received: self.received + self.queued.len(),
            reason: reason.to_string(),
        });
    }
}

/// Turn an upstream SSE byte stream into content fragments
///
/// Fragments decoded before a failure are still delivered, then the failure.
fn content_stream(bytes: ByteStream, endpoint: String) -> ContentStream {
    let state = StreamState {
        bytes,
        buffer: SseBuffer::new(),
        queued: VecDeque::new(),
        failure: None,
        finished: false,
        received: 0,
        endpoint,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(content) = state.queued.pop_front() {
                state.received += 1;
                return Some((Ok(content), state));
            }
            if let Some(err) = state.failure.take() {
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.push_chunk(&chunk);
                    state.drain_blocks();
                }
                Some(Err(e)) => state.fail(e),
                None => {
                    if let Some(rest) = state.buffer.take_remaining() {
                        state.ingest(&rest);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
