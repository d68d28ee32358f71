//! Salience-ordered forward-chaining rules engine.
//!
//! Rules carry an algebraic condition tree and an action that adds facts
//! through a builder. Facts added by an action re-enter matching; a hard
//! iteration cap keeps self-feeding rule sets from spinning forever.

pub mod condition;
pub mod engine;
pub mod rule;

pub use condition::Condition;
pub use engine::{run_rules, EngineMetrics, EngineOutcome, MAX_ITERATIONS};
pub use rule::{FactBuilder, Rule, RuleAction};
