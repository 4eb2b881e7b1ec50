//! Chat protocol request and response types
//!
//! Shared by the HTTP handlers and the client library. Validation is enforced
//! during deserialization - an invalid `ChatCompletionRequest` cannot exist.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Deserializer, Serialize};

/// Message returned to callers whose request fails validation
pub const INVALID_MESSAGES: &str = "Invalid or missing messages in the request body";

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Chat request from client
///
/// Extra protocol fields (`context`, `sessionState`) are accepted and ignored.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    messages: Vec<ChatMessage>,
}

impl ChatCompletionRequest {
    /// Build a request, enforcing the same rules as deserialization
    pub fn new(messages: Vec<ChatMessage>) -> AppResult<Self> {
        validate_messages(&messages).map_err(AppError::Validation)?;
        Ok(Self { messages })
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Content of the most recent message (never empty)
    pub fn last_content(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

fn validate_messages(messages: &[ChatMessage]) -> Result<(), String> {
    match messages.last() {
        Some(last) if !last.content.is_empty() => Ok(()),
        _ => Err(INVALID_MESSAGES.to_string()),
    }
}

impl<'de> Deserialize<'de> for ChatCompletionRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawChatCompletionRequest {
            #[serde(default)]
            messages: Option<Vec<ChatMessage>>,
        }

        let raw = RawChatCompletionRequest::deserialize(deserializer)?;
        let messages = raw.messages.unwrap_or_default();
        validate_messages(&messages).map_err(serde::de::Error::custom)?;

        Ok(Self { messages })
    }
}

/// Assistant message as it appears in completions and deltas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: String,
    pub role: Role,
}

impl AssistantMessage {
    fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::Assistant,
        }
    }
}

/// Non-streaming response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub message: AssistantMessage,
}

impl ChatCompletion {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            message: AssistantMessage::new(content),
        }
    }
}

/// One line of a streaming response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionDelta {
    pub delta: AssistantMessage,
}

impl ChatCompletionDelta {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            delta: AssistantMessage::new(content),
        }
    }

    pub fn content(&self) -> &str {
        &self.delta.content
    }

    /// Serialize as one NDJSON line (JSON object plus `\n`)
    pub fn to_ndjson_line(&self) -> AppResult<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("Failed to serialize delta: {}", e)))?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_and_ignores_protocol_extras() {
        let json = r#"{
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello"},
                {"role": "user", "content": "Bake cookies?"}
            ],
            "context": {"overrides": {}},
            "sessionState": null
        }"#;
        let request: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.messages().len(), 3);
        assert_eq!(request.last_content(), "Bake cookies?");
    }

    #[test]
    fn test_request_rejects_missing_messages() {
        let err = serde_json::from_str::<ChatCompletionRequest>("{}").unwrap_err();
        assert!(err.to_string().contains(INVALID_MESSAGES));
    }

    #[test]
    fn test_request_rejects_empty_messages() {
        assert!(serde_json::from_str::<ChatCompletionRequest>(r#"{"messages": []}"#).is_err());
    }

    #[test]
    fn test_request_rejects_empty_last_content() {
        let json = r#"{"messages": [{"role": "user", "content": "Hi"}, {"role": "user", "content": ""}]}"#;
        assert!(serde_json::from_str::<ChatCompletionRequest>(json).is_err());

        let missing = r#"{"messages": [{"role": "user"}]}"#;
        assert!(serde_json::from_str::<ChatCompletionRequest>(missing).is_err());
    }

    #[test]
    fn test_request_allows_empty_content_before_last() {
        let json = r#"{"messages": [{"role": "assistant", "content": ""}, {"role": "user", "content": "Hi"}]}"#;
        assert!(serde_json::from_str::<ChatCompletionRequest>(json).is_ok());
    }

    #[test]
    fn test_request_rejects_unknown_role() {
        let json = r#"{"messages": [{"role": "tool", "content": "Hi"}]}"#;
        let err = serde_json::from_str::<ChatCompletionRequest>(json).unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn test_new_enforces_same_rules() {
        assert!(matches!(
            ChatCompletionRequest::new(vec![]),
            Err(AppError::Validation(_))
        ));
        assert!(ChatCompletionRequest::new(vec![ChatMessage::user("Hi")]).is_ok());
    }

    #[test]
    fn test_completion_serializes_as_assistant_message() {
        let json = serde_json::to_value(ChatCompletion::assistant("Hello!")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"message": {"content": "Hello!", "role": "assistant"}})
        );
    }

    #[test]
    fn test_delta_ndjson_line_is_single_terminated_object() {
        let line = ChatCompletionDelta::assistant("multi\nline").to_ndjson_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1, "embedded newline must be escaped");

        let parsed: ChatCompletionDelta = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed.content(), "multi\nline");
        assert_eq!(parsed.delta.role, Role::Assistant);
    }
}
