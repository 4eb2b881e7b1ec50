//! HTTP request handlers for the chatrelay API

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::provider::{self, CompletionProvider};
use crate::relay::Relay;
use axum::{
    Router, middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::any::Any;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

pub mod chat;
pub mod extractor;
pub mod health;
pub mod metrics;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    relay: Arc<Relay>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Create state with the provider described by the configuration
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let provider = provider::from_config(&config)?;
        Self::with_provider(config, provider)
    }

    /// Create state around an explicit provider
    pub fn with_provider(
        config: Arc<Config>,
        provider: Arc<dyn CompletionProvider>,
    ) -> AppResult<Self> {
        let metrics = Metrics::new()
            .map_err(|e| AppError::Internal(format!("Failed to create metrics: {}", e)))?;
        let relay = Relay::from_config(&config, provider);

        Ok(Self {
            config,
            relay: Arc::new(relay),
            metrics: Arc::new(metrics),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat::complete_handler))
        .route("/chat/stream", post(chat::stream_handler))
}

/// Full application router with middleware
///
/// Chat routes are served at the root and under `/api`, where the web front
/// ends address them.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(chat_routes())
        .nest("/api", chat_routes())
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .with_state(state)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
}

/// Convert a handler panic into the generic failure response
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");

    tracing::error!(panic = %detail, "Request handler panicked");
    AppError::Internal(detail.to_string()).into_response()
}
