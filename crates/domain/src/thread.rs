//! Conversation threads (provider-agnostic).
//!
//! A thread is an ordered list of messages. Content is an opaque JSON
//! payload: plain text for ordinary turns, raw provider items for
//! `function_call` / `function_call_output` entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "tool")]
    Tool,
    #[serde(rename = "function_call")]
    FunctionCall,
    #[serde(rename = "function_call_output")]
    FunctionCallOutput,
    #[serde(rename = "system-framing")]
    SystemFraming,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: Role,
    pub content: Value,
}

pub type Thread = Vec<ThreadMessage>;

// ── Convenience constructors ───────────────────────────────────────

impl ThreadMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Value::String(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Value::String(text.into()),
        }
    }

    pub fn framing(text: impl Into<String>) -> Self {
        Self {
            role: Role::SystemFraming,
            content: Value::String(text.into()),
        }
    }

    pub fn raw(role: Role, content: Value) -> Self {
        Self { role, content }
    }

    /// The plain-text content, if this message carries text.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("text").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Index of the last user message in a thread, if any.
pub fn last_user_index(thread: &[ThreadMessage]) -> Option<usize> {
    thread.iter().rposition(|m| m.role == Role::User)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_accessor_covers_string_and_object() {
        assert_eq!(ThreadMessage::user("hi").text(), Some("hi"));
        let raw = ThreadMessage::raw(
            Role::Assistant,
            serde_json::json!({"type": "message", "text": "out"}),
        );
        assert_eq!(raw.text(), Some("out"));
        let call = ThreadMessage::raw(Role::FunctionCall, serde_json::json!({"name": "fetch"}));
        assert_eq!(call.text(), None);
    }

    #[test]
    fn role_serde_names() {
        let json = serde_json::to_string(&Role::SystemFraming).unwrap();
        assert_eq!(json, "\"system-framing\"");
        let json = serde_json::to_string(&Role::FunctionCallOutput).unwrap();
        assert_eq!(json, "\"function_call_output\"");
    }

    #[test]
    fn last_user_index_finds_latest() {
        let thread = vec![
            ThreadMessage::user("a"),
            ThreadMessage::assistant("b"),
            ThreadMessage::user("c"),
        ];
        assert_eq!(last_user_index(&thread), Some(2));
        assert_eq!(last_user_index(&[]), None);
    }
}
