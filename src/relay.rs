//! Completion relay
//!
//! Turns one validated [`ChatCompletionRequest`] into either a single
//! [`ChatCompletion`] or a lazy stream of [`ChatCompletionDelta`]s. The relay
//! holds no per-request state; every call goes to the provider exactly once
//! and failures are reported, never retried.

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::protocol::{ChatCompletion, ChatCompletionDelta, ChatCompletionRequest, ChatMessage};
use crate::provider::{CompletionProvider, CompletionRequest, ContentStream};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Forward-only, single-consumption stream of non-empty deltas
///
/// Dropping it abandons the upstream call and releases its connection.
pub type DeltaStream = BoxStream<'static, AppResult<ChatCompletionDelta>>;

pub struct Relay {
    provider: Arc<dyn CompletionProvider>,
    system_prompt: String,
    timeout: Duration,
}

impl Relay {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        system_prompt: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            system_prompt: system_prompt.into(),
            timeout,
        }
    }

    pub fn from_config(config: &Config, provider: Arc<dyn CompletionProvider>) -> Self {
        Self::new(
            provider,
            config.provider.system_prompt(),
            config.request_timeout(),
        )
    }

    pub fn provider(&self) -> &dyn CompletionProvider {
        self.provider.as_ref()
    }

    /// Conversation sent upstream: system instruction, then the caller's history
    fn upstream_request(&self, request: &ChatCompletionRequest, user: Option<String>) -> CompletionRequest {
        let mut messages = Vec::with_capacity(request.messages().len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend_from_slice(request.messages());

        CompletionRequest { messages, user }
    }

    async fn bounded<T>(&self, call: impl Future<Output = AppResult<T>>) -> AppResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AppError::UpstreamTimeout {
                endpoint: self.provider.endpoint().to_string(),
                timeout_seconds: self.timeout.as_secs(),
            })?
    }

    /// Await the full assistant reply
    pub async fn complete(
        &self,
        request: &ChatCompletionRequest,
        user: Option<String>,
    ) -> AppResult<ChatCompletion> {
        let upstream = self.upstream_request(request, user);
        let content = self.bounded(self.provider.complete(&upstream)).await?;
        Ok(ChatCompletion::assistant(content))
    }

    /// Start a streaming reply
    ///
    /// Resolves once the upstream has accepted the call, so connection and
    /// credential failures surface here rather than inside the stream.
    pub async fn stream(
        &self,
        request: &ChatCompletionRequest,
        user: Option<String>,
    ) -> AppResult<DeltaStream> {
        let upstream = self.upstream_request(request, user);
        let contents = self.bounded(self.provider.stream_complete(&upstream)).await?;
        Ok(non_empty_deltas(contents))
    }
}

/// Wrap upstream content as deltas, dropping empty fragments
pub fn non_empty_deltas(contents: ContentStream) -> DeltaStream {
    contents
        .try_filter_map(|content| async move {
            Ok((!content.is_empty()).then(|| ChatCompletionDelta::assistant(content)))
        })
        .boxed()
}
