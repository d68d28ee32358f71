//! Boundary model — nested execution scopes within a turn.
//!
//! Every start/end pair of events in the journal carries a boundary id;
//! children carry their parent's id so the trace forms a tree. Ids are
//! random (`<kind>-<uuid>`), never derived from timestamps.

use serde::{Deserialize, Serialize};

/// The kind of scope a boundary delimits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    Session,
    Turn,
    Orchestration,
    Pipeline,
    Execution,
    Cycle,
    Step,
    Branch,
    Tool,
    LlmExchange,
}

impl BoundaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Turn => "turn",
            Self::Orchestration => "orchestration",
            Self::Pipeline => "pipeline",
            Self::Execution => "execution",
            Self::Cycle => "cycle",
            Self::Step => "step",
            Self::Branch => "branch",
            Self::Tool => "tool",
            Self::LlmExchange => "llm_exchange",
        }
    }
}

impl std::fmt::Display for BoundaryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mint a fresh boundary id for the given kind.
pub fn new_boundary_id(kind: BoundaryType) -> String {
    format!("{}-{}", kind.as_str(), uuid::Uuid::new_v4().simple())
}
