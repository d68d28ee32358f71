//! Provider responses and execution results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Token usage for one or more provider calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt: u32,
    pub completion: u32,
}

impl Usage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self { prompt, completion }
    }

    pub fn total(&self) -> u32 {
        self.prompt + self.completion
    }

    /// Accumulate another call's usage into this one.
    pub fn absorb(&mut self, other: &Usage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
    }
}

/// Why the provider (or the task loop) stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Complete,
    ToolUse,
    ToolCalls,
    MaxTokens,
    MaxCycles,
    MaxToolCalls,
    Timeout,
}

impl FinishReason {
    /// Reasons that signal the task loop should run another cycle.
    pub fn is_continuation(&self) -> bool {
        matches!(self, Self::ToolUse | Self::ToolCalls | Self::MaxTokens)
    }

    /// Reasons that indicate a tool round-trip is pending.
    pub fn is_tool_signal(&self) -> bool {
        matches!(self, Self::ToolUse | Self::ToolCalls)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    pub call_id: String,
    pub tool: String,
    pub args: Value,
}

/// A provider reply (or an aggregate built by an execution handler).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub output: String,
    pub usage: Usage,
    pub model: String,
    pub finish_reason: FinishReason,
    /// Raw provider output items (Responses-style), when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_items: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Response {
    pub fn text(output: impl Into<String>, model: impl Into<String>, usage: Usage) -> Self {
        Self {
            output: output.into(),
            usage,
            model: model.into(),
            finish_reason: FinishReason::Complete,
            output_items: None,
            tool_calls: None,
            error: None,
            metadata: Map::new(),
        }
    }

    /// A response describing an upstream failure without propagating it.
    pub fn from_error(message: impl Into<String>, model: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            output: format!("The language model call failed: {message}"),
            usage: Usage::default(),
            model: model.into(),
            finish_reason: FinishReason::Complete,
            output_items: None,
            tool_calls: None,
            error: Some(message),
            metadata: Map::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_owned(), value);
        self
    }
}

/// One branch's outcome inside a parallel or sequential execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchResult {
    pub role: String,
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_absorb_accumulates() {
        let mut total = Usage::default();
        total.absorb(&Usage::new(100, 40));
        total.absorb(&Usage::new(50, 10));
        assert_eq!(total.prompt, 150);
        assert_eq!(total.completion, 50);
        assert_eq!(total.total(), 200);
    }

    #[test]
    fn continuation_reasons() {
        assert!(FinishReason::ToolUse.is_continuation());
        assert!(FinishReason::ToolCalls.is_continuation());
        assert!(FinishReason::MaxTokens.is_continuation());
        assert!(!FinishReason::Complete.is_continuation());
        assert!(!FinishReason::Timeout.is_continuation());
        assert!(!FinishReason::MaxCycles.is_continuation());
    }

    #[test]
    fn finish_reason_serde_names() {
        assert_eq!(
            serde_json::to_string(&FinishReason::MaxToolCalls).unwrap(),
            "\"max_tool_calls\""
        );
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolUse).unwrap(),
            "\"tool_use\""
        );
    }

    #[test]
    fn error_response_keeps_error_as_value() {
        let resp = Response::from_error("rate limited", "gpt-test");
        assert_eq!(resp.error.as_deref(), Some("rate limited"));
        assert!(resp.output.contains("rate limited"));
        assert_eq!(resp.usage.total(), 0);
        assert!(!resp.has_tool_calls());
    }
}
