//! Conversation message model

use serde::{Deserialize, Serialize};

use crate::tools::{ToolArgs, ToolResult};

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Persona / instructions
    System,
    /// The human
    User,
    /// The model
    Assistant,
    /// A tool result
    Tool,
}

/// A model-initiated request to run a local tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id assigned by the model provider
    pub id: String,

    /// Tool name
    pub name: String,

    /// Structured arguments
    #[serde(default)]
    pub arguments: ToolArgs,
}

impl ToolCallRequest {
    /// Create a tool call request
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: ToolArgs) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One entry of the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author
    pub role: Role,

    /// Text content, possibly empty
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Id of the tool call a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Name of the tool a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// System message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// User message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Assistant message without tool calls
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant message requesting tool calls
    #[must_use]
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Tool message answering `call` with a serialized result
    #[must_use]
    pub fn tool_result(call: &ToolCallRequest, result: &ToolResult) -> Self {
        let content = serde_json::Value::Object(result.clone()).to_string();
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            ..Self::plain(Role::Tool, content)
        }
    }

    /// Whether this message requests any tool calls
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Parse the structured result carried by a tool message
    ///
    /// Non-object payloads are wrapped as `{"result": ...}`.
    #[must_use]
    pub fn tool_payload(&self) -> Option<ToolResult> {
        if self.role != Role::Tool {
            return None;
        }
        match serde_json::from_str::<serde_json::Value>(&self.content) {
            Ok(serde_json::Value::Object(map)) => Some(map),
            Ok(other) => {
                let mut map = ToolResult::new();
                map.insert("result".to_string(), other);
                Some(map)
            }
            Err(_) => {
                let mut map = ToolResult::new();
                map.insert("result".to_string(), self.content.clone().into());
                Some(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_is_correlated() {
        let call = ToolCallRequest::new("call_1", "get_today_date", ToolArgs::new());
        let mut result = ToolResult::new();
        result.insert("text".to_string(), "Today is Monday".into());

        let msg = Message::tool_result(&call, &result);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("get_today_date"));
        assert_eq!(msg.tool_payload(), Some(result));
    }

    #[test]
    fn plain_text_tool_payload_is_wrapped() {
        let msg = Message {
            content: "not json".to_string(),
            ..Message::plain(Role::Tool, "")
        };
        let payload = msg.tool_payload().unwrap();
        assert_eq!(payload["result"], "not json");
    }

    #[test]
    fn only_tool_messages_have_payloads() {
        assert!(Message::user("{}").tool_payload().is_none());
    }

    #[test]
    fn serializes_role_lowercase_and_skips_empty_fields() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "user", "content": "hi" }));
    }
}
