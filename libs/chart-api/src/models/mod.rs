//! API models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum accepted length of a request message, in characters
pub const MAX_MESSAGE_LEN: usize = 10_000;

/// Agent request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub user_id: String,
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub stream: bool,
}

impl AgentRequest {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            message: message.into(),
            context: None,
            stream: false,
        }
    }

    /// Check the request shape, returning a description of the first problem found
    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("userId must not be empty".to_string());
        }
        if self.session_id.trim().is_empty() {
            return Err("sessionId must not be empty".to_string());
        }
        let len = self.message.chars().count();
        if len == 0 {
            return Err("message must not be empty".to_string());
        }
        if len > MAX_MESSAGE_LEN {
            return Err(format!(
                "message is too long ({} characters, max {})",
                len, MAX_MESSAGE_LEN
            ));
        }
        Ok(())
    }
}

/// Optional caller context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub role: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Clarification question returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Agent response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_needed: Option<Clarification>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentResponse {
    /// Terminal state tag stored under `metadata.state`
    pub fn state(&self) -> Option<&str> {
        self.metadata.get("state").and_then(|v| v.as_str())
    }
}

/// Progress event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Progress,
    Error,
    Done,
    Content,
}

/// Progress event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Progress event streamed to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: EventData,
}

impl ProgressEvent {
    fn build(event_type: EventType, operation: &str, message: &str) -> Self {
        Self {
            event_type,
            data: EventData {
                operation: operation.to_string(),
                current_state: None,
                percentage: None,
                message: message.to_string(),
                timestamp: chrono::Utc::now().timestamp_millis(),
                metadata: None,
                content: None,
            },
        }
    }

    /// Step-level progress
    pub fn progress(operation: &str, message: &str, current_state: &str, percentage: u8) -> Self {
        let mut event = Self::build(EventType::Progress, operation, message);
        event.data.current_state = Some(current_state.to_string());
        event.data.percentage = Some(percentage);
        event
    }

    /// Failure of the whole operation
    pub fn error(operation: &str, message: &str, metadata: Option<Map<String, Value>>) -> Self {
        let mut event = Self::build(EventType::Error, operation, message);
        event.data.metadata = metadata;
        event
    }

    /// Completion of the operation
    pub fn done(operation: &str, message: &str, metadata: Option<Map<String, Value>>) -> Self {
        let mut event = Self::build(EventType::Done, operation, message);
        event.data.metadata = metadata;
        event
    }

    /// Streamed text chunk
    pub fn content(operation: &str, content: &str) -> Self {
        let mut event = Self::build(EventType::Content, operation, "Content chunk");
        event.data.content = Some(content.to_string());
        event
    }
}
