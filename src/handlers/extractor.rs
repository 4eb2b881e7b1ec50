//! Lenient JSON body extractor for chat requests
//!
//! The web front ends do not always send `Content-Type: application/json`, so
//! the body is parsed regardless of content type. Failures are classified
//! into the crate's error taxonomy:
//! - structurally wrong JSON (missing fields, bad values) → `AppError::Validation`
//! - unreadable or syntactically broken bodies → `AppError::MalformedBody`

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// JSON body extractor producing [`AppError`] rejections
///
/// Take it as `Result<ChatJson<T>, AppError>` to handle rejections inside the
/// handler alongside every other failure.
pub struct ChatJson<T>(pub T);

impl<S, T> FromRequest<S> for ChatJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| AppError::MalformedBody(rejection.body_text()))?;

        parse_json(&bytes).map(ChatJson)
    }
}

/// Parse a JSON body, classifying failures
pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(bytes).map_err(|e| {
        if e.is_data() {
            AppError::Validation(without_position(&e))
        } else {
            AppError::MalformedBody(e.to_string())
        }
    })
}

/// serde_json error text without its " at line X column Y" suffix
fn without_position(error: &serde_json::Error) -> String {
    let text = error.to_string();
    let suffix = format!(" at line {} column {}", error.line(), error.column());
    text.strip_suffix(&suffix).unwrap_or(&text).to_string()
}
