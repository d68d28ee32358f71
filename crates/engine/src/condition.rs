//! Algebraic condition trees.
//!
//! Conditions are data, not opaque closures, so rule sets can be inspected
//! and logged. The `Test` variant remains as an escape hatch for predicates
//! the structured variants cannot express.

use std::sync::Arc;

use ts_domain::fact::{Fact, FactKind, FactMap};

/// A condition over the working memory.
#[derive(Clone)]
pub enum Condition {
    /// Always true.
    Always,
    /// Every child must hold.
    All(Vec<Condition>),
    /// At least one child must hold.
    Any(Vec<Condition>),
    /// Child must not hold.
    Not(Box<Condition>),
    /// At least one fact of this tag exists.
    HasKind(FactKind),
    /// A signal matching the given filters exists.
    Signal {
        dimension: Option<String>,
        signal: Option<String>,
        min_confidence: Option<f64>,
    },
    /// An execution plan matching the predicate exists.
    PlanMatches(Arc<dyn Fn(&ts_domain::plan::Plan) -> bool + Send + Sync>),
    /// Escape hatch: arbitrary predicate over the fact map.
    Test(Arc<dyn Fn(&FactMap) -> bool + Send + Sync>),
}

impl Condition {
    /// Convenience: a signal filter on dimension + name.
    pub fn signal(dimension: &str, signal: &str) -> Self {
        Self::Signal {
            dimension: Some(dimension.to_owned()),
            signal: Some(signal.to_owned()),
            min_confidence: None,
        }
    }

    pub fn matches(&self, facts: &FactMap) -> bool {
        match self {
            Self::Always => true,
            Self::All(children) => children.iter().all(|c| c.matches(facts)),
            Self::Any(children) => children.iter().any(|c| c.matches(facts)),
            Self::Not(child) => !child.matches(facts),
            Self::HasKind(kind) => facts.has(*kind),
            Self::Signal {
                dimension,
                signal,
                min_confidence,
            } => facts.all(FactKind::Signal).iter().any(|fact| {
                let Fact::Signal {
                    dimension: d,
                    signal: s,
                    confidence,
                    ..
                } = fact
                else {
                    return false;
                };
                dimension.as_deref().map_or(true, |want| want == d)
                    && signal.as_deref().map_or(true, |want| want == s)
                    && min_confidence.map_or(true, |min| *confidence >= min)
            }),
            Self::PlanMatches(predicate) => facts
                .all(FactKind::ExecutionPlan)
                .iter()
                .any(|fact| match fact {
                    Fact::ExecutionPlan { plan, .. } => predicate(plan),
                    _ => false,
                }),
            Self::Test(predicate) => predicate(facts),
        }
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::All(c) => f.debug_tuple("All").field(c).finish(),
            Self::Any(c) => f.debug_tuple("Any").field(c).finish(),
            Self::Not(c) => f.debug_tuple("Not").field(c).finish(),
            Self::HasKind(k) => f.debug_tuple("HasKind").field(k).finish(),
            Self::Signal {
                dimension,
                signal,
                min_confidence,
            } => f
                .debug_struct("Signal")
                .field("dimension", dimension)
                .field("signal", signal)
                .field("min_confidence", min_confidence)
                .finish(),
            Self::PlanMatches(_) => write!(f, "PlanMatches(..)"),
            Self::Test(_) => write!(f, "Test(..)"),
        }
    }
}
