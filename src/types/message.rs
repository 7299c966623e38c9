//! Message types for model communication and agent memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in a conversation. Immutable once appended to memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool name for tool-result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            name: None,
            tool_call_id: None,
            attachment: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, Some(text.into()))
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, Some(text.into()))
    }

    /// Create a user message with an attached image.
    pub fn user_with_image(text: impl Into<String>, data: String, mime_type: String) -> Self {
        let mut message = Self::new(Role::User, Some(text.into()));
        message.attachment = Some(Attachment { data, mime_type });
        message
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(text.into()))
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tools(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::new(Role::Assistant, text.filter(|t| !t.is_empty()));
        message.tool_calls = tool_calls;
        message
    }

    /// Create a tool result message answering `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::new(Role::Tool, Some(content.into()));
        message.tool_call_id = Some(tool_call_id.into());
        message.name = Some(tool_name.into());
        message
    }

    /// Text content, or the empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Conversation role.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Binary attachment (an image) embedded in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    /// Base64-encoded payload.
    pub data: String,
    pub mime_type: String,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Serialized JSON arguments, passed through untouched.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn role_round_trips_lowercase() {
        assert_eq!(serde_json::to_value(Role::Assistant).unwrap(), "assistant");
        assert_eq!("tool".parse::<Role>().unwrap(), Role::Tool);
    }

    #[test]
    fn tool_result_carries_call_id_and_name() {
        let msg = Message::tool_result("call_1", "mcp_a_echo", "42");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("mcp_a_echo"));
        assert_eq!(msg.text(), "42");
    }

    #[test]
    fn assistant_with_tools_drops_empty_text() {
        let msg = Message::assistant_with_tools(
            Some(String::new()),
            vec![ToolCall::new("c1", "terminate", "{}")],
        );
        assert!(msg.content.is_none());
        assert!(msg.has_tool_calls());
    }
}
