//! User policy — the knobs that bound what the execution plane may do.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-dimension gate applied to detected signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalGate {
    pub enabled: bool,
    pub min_confidence: f64,
}

impl Default for SignalGate {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.0,
        }
    }
}

/// User policy knobs. All limits are optional; absent means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policy {
    pub max_depth: Option<u32>,
    pub max_fanout: Option<u32>,
    pub max_sequential_steps: Option<u32>,
    pub max_task_cycles: Option<u32>,
    /// Allow-list applied to discovered tools. Absent = allow all.
    pub allowed_tools: Option<Vec<String>>,
    /// Skip the approval rendezvous for tool calls.
    pub auto_approve_tools: bool,
    /// Milliseconds to wait for a tool approval; `-1` waits indefinitely.
    pub approval_timeout_ms: i64,
    /// Per-dimension signal gates; `default_gate` applies otherwise.
    pub signal_gates: HashMap<String, SignalGate>,
    pub default_gate: SignalGate,
}

impl Policy {
    /// The gate in effect for a classifier dimension.
    pub fn gate_for(&self, dimension: &str) -> SignalGate {
        self.signal_gates
            .get(dimension)
            .copied()
            .unwrap_or(self.default_gate)
    }

    /// Whether a tool name passes the allow-list.
    pub fn tool_allowed(&self, name: &str) -> bool {
        match &self.allowed_tools {
            Some(list) => list.iter().any(|t| t == name),
            None => true,
        }
    }
}

/// Default approval wait used when the policy leaves it zero.
pub const DEFAULT_APPROVAL_TIMEOUT_MS: i64 = 120_000;
