//! Chat endpoint handlers
//!
//! POST /chat answers with one JSON completion, POST /chat/stream with an
//! NDJSON body of deltas. Both share request parsing, the security context
//! and error mapping.

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::handlers::extractor::ChatJson;
use crate::metrics::{Metrics, Mode, Outcome};
use crate::middleware::RequestId;
use crate::protocol::ChatCompletionRequest;
use crate::relay::DeltaStream;
use crate::security::SecurityContext;
use axum::{
    Extension, Json,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Content type of streaming responses
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// POST /chat handler
///
/// Returns `200` with `{"message": {"content": ..., "role": "assistant"}}`.
pub async fn complete_handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Result<ChatJson<ChatCompletionRequest>, AppError>,
) -> Response {
    let request = match body {
        Ok(ChatJson(request)) => request,
        Err(e) => return failure(&state, Mode::Complete, request_id, e),
    };

    tracing::debug!(
        request_id = %request_id,
        messages_count = request.messages().len(),
        "Received chat request"
    );

    let user = user_context(&state, &headers, request_id);
    let started = Instant::now();
    let result = state.relay().complete(&request, user).await;
    state
        .metrics()
        .record_upstream_duration(Mode::Complete, started.elapsed().as_secs_f64());

    match result {
        Ok(completion) => {
            tracing::info!(
                request_id = %request_id,
                response_length = completion.message.content.len(),
                "Chat request completed"
            );
            state
                .metrics()
                .record_request(Mode::Complete, Outcome::Success);
            (StatusCode::OK, Json(completion)).into_response()
        }
        Err(e) => failure(&state, Mode::Complete, request_id, e),
    }
}

/// POST /chat/stream handler
///
/// Returns `200` with a chunked NDJSON body, one `{"delta": {...}}` object per
/// line. Failures before the first byte produce the same error responses as
/// the non-streaming handler; an upstream failure after that aborts the body.
pub async fn stream_handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Result<ChatJson<ChatCompletionRequest>, AppError>,
) -> Response {
    let request = match body {
        Ok(ChatJson(request)) => request,
        Err(e) => return failure(&state, Mode::Stream, request_id, e),
    };

    tracing::debug!(
        request_id = %request_id,
        messages_count = request.messages().len(),
        "Received streaming chat request"
    );

    let user = user_context(&state, &headers, request_id);
    let started = Instant::now();
    let result = state.relay().stream(&request, user).await;
    state
        .metrics()
        .record_upstream_duration(Mode::Stream, started.elapsed().as_secs_f64());

    match result {
        Ok(deltas) => {
            tracing::info!(request_id = %request_id, "Starting streaming response");
            state.metrics().record_request(Mode::Stream, Outcome::Success);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
                    (header::TRANSFER_ENCODING, "chunked"),
                ],
                Body::from_stream(ndjson_body(deltas, state.metrics().clone(), request_id)),
            )
                .into_response()
        }
        Err(e) => failure(&state, Mode::Stream, request_id, e),
    }
}

/// Encode deltas as NDJSON lines
///
/// An error item ends the body early; the client sees a truncated response.
fn ndjson_body(
    deltas: DeltaStream,
    metrics: Arc<Metrics>,
    request_id: RequestId,
) -> impl futures::Stream<Item = AppResult<String>> + Send + 'static {
    deltas.map(move |item| match item {
        Ok(delta) => {
            metrics.record_stream_delta();
            delta.to_ndjson_line()
        }
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                error = %e,
                "Upstream stream failed mid-response, aborting body"
            );
            metrics.record_stream_interruption();
            Err(e)
        }
    })
}

/// Serialized security context for the upstream `user` field, when enabled
fn user_context(state: &AppState, headers: &HeaderMap, request_id: RequestId) -> Option<String> {
    let security = &state.config().security;
    if !security.attach_user_context {
        return None;
    }

    let context = SecurityContext::from_headers(headers, security).to_json();
    tracing::debug!(request_id = %request_id, security_context = %context, "Attached security context");
    Some(context)
}

/// Log, count and convert a failed request
fn failure(state: &AppState, mode: Mode, request_id: RequestId, error: AppError) -> Response {
    if error.is_client_error() {
        tracing::debug!(request_id = %request_id, error = %error, "Rejected chat request");
        state.metrics().record_request(mode, Outcome::ClientError);
    } else {
        tracing::error!(request_id = %request_id, error = %error, "Chat request failed");
        state.metrics().record_request(mode, Outcome::UpstreamError);
    }
    error.into_response()
}
