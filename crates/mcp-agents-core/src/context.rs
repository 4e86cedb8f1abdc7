//! Conversation context shared by the queries of one session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// One message of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool that produced this message, for `Role::Tool`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Create a tool result message.
    #[must_use]
    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

/// Conversation state for one connected session.
///
/// A single context is shared by every query issued against a session;
/// the query worker is its only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Opaque conversation identifier.
    pub thread_id: String,

    /// Accumulated message history, oldest first.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Arbitrary metadata for runtime-specific needs.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationContext {
    /// Create an empty context with a fresh thread id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_thread_id(Uuid::new_v4().to_string())
    }

    /// Create an empty context with a caller-chosen thread id.
    #[must_use]
    pub fn with_thread_id(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Append messages to the history.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_contexts_have_distinct_threads() {
        let a = ConversationContext::new();
        let b = ConversationContext::new();
        assert_ne!(a.thread_id, b.thread_id);
        assert!(a.messages.is_empty());
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));

        let tool = serde_json::to_value(ChatMessage::tool("echo", "hi")).unwrap();
        assert_eq!(tool["tool_name"], "echo");
    }

    #[test]
    fn test_metadata_survives_snapshot() {
        let mut ctx = ConversationContext::with_thread_id("t-1");
        ctx.set_metadata("model", serde_json::json!("qwen3:0.6b"));
        let snapshot = ctx.clone();
        ctx.extend([ChatMessage::user("hi")]);

        assert_eq!(snapshot.thread_id, "t-1");
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.get_metadata("model"), Some(&serde_json::json!("qwen3:0.6b")));
    }
}
