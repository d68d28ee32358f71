//! Execution plans — the decision plane's output.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Direct,
    Sequential,
    Parallel,
    Task,
    Fallback,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Task => "task",
            Self::Fallback => "fallback",
        }
    }
}

/// Termination contract for a task (and budget hints for other strategies).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// How a multi-branch strategy folds branch outputs into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStrategy {
    Last,
    Concat,
    Label,
    Formatted,
}

/// One step of a sequential plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStep {
    pub role: String,
    /// Overrides the default `task` strategy for this step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    /// Only honored when the effective strategy is `task`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

impl SequenceStep {
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            strategy: None,
            tools: None,
        }
    }
}

/// A plan, discriminated by `strategy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub strategy: Strategy,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Sequential only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Vec<SequenceStep>>,
    /// Parallel only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_strategy: Option<ResultStrategy>,
    /// Sequential only: accumulate each step's output into a running thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_accumulation: Option<bool>,
    /// Sequential only: replace the step thread with a single labeled-turn
    /// user message. Takes precedence over `thread_accumulation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_thread: Option<bool>,
}

impl Plan {
    pub fn direct(role: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::Direct,
            role: role.into(),
            tools: None,
            resolution: None,
            sequence: None,
            roles: None,
            result_strategy: None,
            thread_accumulation: None,
            build_thread: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Whether this plan carries a non-empty tool list.
    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Fan-out width: parallel branch count, else 1.
    pub fn fanout(&self) -> usize {
        self.roles.as_ref().map_or(1, Vec::len)
    }

    /// Sequential step count, else 0.
    pub fn step_count(&self) -> usize {
        self.sequence.as_ref().map_or(0, Vec::len)
    }
}
