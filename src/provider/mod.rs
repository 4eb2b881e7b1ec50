//! Upstream completion providers
//!
//! The relay reaches the model through the [`CompletionProvider`] capability.
//! Concrete providers are selected by configuration in [`from_config`].

pub mod azure;
pub mod credential;
pub mod sse;

use crate::config::{AuthMode, Config};
use crate::error::{AppError, AppResult};
use crate::protocol::ChatMessage;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

pub use azure::{AzureOpenAiProvider, UpstreamAuth};
pub use credential::{AccessToken, ManagedIdentityCredential, StaticTokenCredential, TokenCredential};

/// Lazy, single-consumption sequence of upstream content fragments
///
/// Fragments may be empty; filtering is the relay's job. Dropping the stream
/// releases the upstream connection.
pub type ContentStream = BoxStream<'static, AppResult<String>>;

/// Everything a provider needs for one call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Opaque end-user annotation forwarded to the provider
    pub user: Option<String>,
}

/// Capability to complete a conversation, in full or as a stream
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Human-readable upstream identity for logs and errors
    fn endpoint(&self) -> &str;

    /// Returns the assistant's full reply
    async fn complete(&self, request: &CompletionRequest) -> AppResult<String>;

    /// Starts a streaming completion
    ///
    /// Resolves once the upstream has accepted the request; content arrives
    /// through the returned stream.
    async fn stream_complete(&self, request: &CompletionRequest) -> AppResult<ContentStream>;
}

/// Build the provider described by `config`
pub fn from_config(config: &Config) -> AppResult<Arc<dyn CompletionProvider>> {
    let provider = &config.provider;

    let auth = match provider.auth {
        AuthMode::ApiKey => {
            let key = provider.api_key.clone().ok_or_else(|| {
                AppError::Config("provider.api_key is required for api_key auth".to_string())
            })?;
            UpstreamAuth::ApiKey(key)
        }
        AuthMode::ManagedIdentity if provider.is_local_emulator() => {
            tracing::info!(
                endpoint = %provider.endpoint,
                "Local emulator endpoint, using a placeholder bearer token"
            );
            UpstreamAuth::Token(Arc::new(StaticTokenCredential::new("__fake_token__")))
        }
        AuthMode::ManagedIdentity => {
            UpstreamAuth::Token(Arc::new(ManagedIdentityCredential::from_env()?))
        }
    };

    Ok(Arc::new(AzureOpenAiProvider::new(provider, auth)?))
}
