//! Composed instructions — what the execution plane feeds the provider.

use serde::{Deserialize, Serialize};

use crate::plan::Strategy;

/// Metadata recorded alongside the composed instruction set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionMetadata {
    pub role: String,
    pub base_tokens: u32,
    pub token_multiplier: f64,
    pub length_level: String,
    #[serde(default)]
    pub adaptation_keys: Vec<String>,
    /// Enriched by the pipeline after composition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_available: Option<Vec<String>>,
}

/// The composed instruction set. All string fields are always present
/// (possibly empty); `max_tokens` is a positive integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instructions {
    pub system: String,
    pub primary: String,
    pub adaptations: String,
    pub length_guidance: String,
    pub tool_instructions: String,
    pub max_tokens: u32,
    pub metadata: InstructionMetadata,
}

impl Instructions {
    /// The system text sent to the provider: system prompt plus the
    /// adaptations suffix when one was composed.
    pub fn system_text(&self) -> String {
        if self.adaptations.is_empty() {
            self.system.clone()
        } else {
            format!("{}\n\n{}", self.system, self.adaptations)
        }
    }
}
