//! Facts — the unit of communication between the decision-plane stages.
//!
//! A fact is a tagged variant with optional provenance. The `FactMap`
//! groups facts by tag, preserving insertion order within each tag so
//! later evaluators can prefer the most recent entry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::Plan;

/// Where a fact came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl Provenance {
    /// Fill in `source` and `producer` where the fact did not set them.
    /// Fields already present are never overwritten.
    pub fn merge_defaults(&mut self, source: &str, producer: &str) {
        if self.source.is_none() {
            self.source = Some(source.to_owned());
        }
        if self.producer.is_none() {
            self.producer = Some(producer.to_owned());
        }
    }
}

/// Fact tag, used as the `FactMap` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactKind {
    Signal,
    RoleSelection,
    ExecutionPlan,
    SelectedPlan,
    TokenMultiplier,
    Derived,
    Config,
    ToolAvailability,
    Capability,
    PolicyConstraint,
    PolicyPreference,
    ToolPolicyStatement,
}

/// A tagged fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Fact {
    Signal {
        dimension: String,
        signal: String,
        confidence: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    RoleSelection {
        role: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    ExecutionPlan {
        plan: Plan,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        policy_blocked: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        policy_adjusted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    SelectedPlan {
        plan: Plan,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    TokenMultiplier {
        value: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    Derived {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    Config {
        path: String,
        value: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    ToolAvailability {
        tools: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    Capability {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    PolicyConstraint {
        constraint: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    PolicyPreference {
        preference: String,
        value: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
    ToolPolicyStatement {
        tool: String,
        allowed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },
}

impl Fact {
    pub fn kind(&self) -> FactKind {
        match self {
            Self::Signal { .. } => FactKind::Signal,
            Self::RoleSelection { .. } => FactKind::RoleSelection,
            Self::ExecutionPlan { .. } => FactKind::ExecutionPlan,
            Self::SelectedPlan { .. } => FactKind::SelectedPlan,
            Self::TokenMultiplier { .. } => FactKind::TokenMultiplier,
            Self::Derived { .. } => FactKind::Derived,
            Self::Config { .. } => FactKind::Config,
            Self::ToolAvailability { .. } => FactKind::ToolAvailability,
            Self::Capability { .. } => FactKind::Capability,
            Self::PolicyConstraint { .. } => FactKind::PolicyConstraint,
            Self::PolicyPreference { .. } => FactKind::PolicyPreference,
            Self::ToolPolicyStatement { .. } => FactKind::ToolPolicyStatement,
        }
    }

    /// The confidence carried by this fact, if the variant has one.
    pub fn confidence(&self) -> Option<f64> {
        match self {
            Self::Signal { confidence, .. } => Some(*confidence),
            Self::RoleSelection { confidence, .. }
            | Self::ExecutionPlan { confidence, .. }
            | Self::SelectedPlan { confidence, .. } => *confidence,
            _ => None,
        }
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        match self {
            Self::Signal { provenance, .. }
            | Self::RoleSelection { provenance, .. }
            | Self::ExecutionPlan { provenance, .. }
            | Self::SelectedPlan { provenance, .. }
            | Self::TokenMultiplier { provenance, .. }
            | Self::Derived { provenance, .. }
            | Self::Config { provenance, .. }
            | Self::ToolAvailability { provenance, .. }
            | Self::Capability { provenance, .. }
            | Self::PolicyConstraint { provenance, .. }
            | Self::PolicyPreference { provenance, .. }
            | Self::ToolPolicyStatement { provenance, .. } => provenance.as_ref(),
        }
    }

    pub fn provenance_mut(&mut self) -> &mut Option<Provenance> {
        match self {
            Self::Signal { provenance, .. }
            | Self::RoleSelection { provenance, .. }
            | Self::ExecutionPlan { provenance, .. }
            | Self::SelectedPlan { provenance, .. }
            | Self::TokenMultiplier { provenance, .. }
            | Self::Derived { provenance, .. }
            | Self::Config { provenance, .. }
            | Self::ToolAvailability { provenance, .. }
            | Self::Capability { provenance, .. }
            | Self::PolicyConstraint { provenance, .. }
            | Self::PolicyPreference { provenance, .. }
            | Self::ToolPolicyStatement { provenance, .. } => provenance,
        }
    }

    /// Signal constructor without data or provenance.
    pub fn signal(dimension: impl Into<String>, signal: impl Into<String>, confidence: f64) -> Self {
        Self::Signal {
            dimension: dimension.into(),
            signal: signal.into(),
            confidence,
            data: None,
            provenance: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FactMap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Facts grouped by tag, per-tag insertion order preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactMap {
    map: HashMap<FactKind, Vec<Fact>>,
}

impl FactMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fact: Fact) {
        self.map.entry(fact.kind()).or_default().push(fact);
    }

    /// Insert unless a structurally equal fact of the same tag exists.
    /// Returns `true` if the fact was added.
    pub fn insert_unique(&mut self, fact: Fact) -> bool {
        let bucket = self.map.entry(fact.kind()).or_default();
        if bucket.contains(&fact) {
            return false;
        }
        bucket.push(fact);
        true
    }

    pub fn all(&self, kind: FactKind) -> &[Fact] {
        self.map.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// The most recently inserted fact of a tag.
    pub fn last(&self, kind: FactKind) -> Option<&Fact> {
        self.map.get(&kind).and_then(|v| v.last())
    }

    pub fn has(&self, kind: FactKind) -> bool {
        self.map.get(&kind).is_some_and(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extend(&mut self, facts: impl IntoIterator<Item = Fact>) {
        for fact in facts {
            self.insert(fact);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.map.values().flatten()
    }
}

impl FromIterator<Fact> for FactMap {
    fn from_iter<I: IntoIterator<Item = Fact>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_map_preserves_per_kind_order() {
        let mut map = FactMap::new();
        map.insert(Fact::signal("tone", "formal", 0.8));
        map.insert(Fact::signal("tone", "curious", 0.5));
        map.insert(Fact::Capability {
            name: "tool_use".into(),
            provenance: None,
        });

        let signals = map.all(FactKind::Signal);
        assert_eq!(signals.len(), 2);
        match map.last(FactKind::Signal) {
            Some(Fact::Signal { signal, .. }) => assert_eq!(signal, "curious"),
            other => panic!("unexpected last signal: {other:?}"),
        }
        assert!(map.has(FactKind::Capability));
        assert!(!map.has(FactKind::SelectedPlan));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn insert_unique_skips_duplicates() {
        let mut map = FactMap::new();
        assert!(map.insert_unique(Fact::signal("tone", "formal", 0.8)));
        assert!(!map.insert_unique(Fact::signal("tone", "formal", 0.8)));
        assert!(map.insert_unique(Fact::signal("tone", "formal", 0.9)));
        assert_eq!(map.all(FactKind::Signal).len(), 2);
    }

    #[test]
    fn provenance_merge_preserves_existing_fields() {
        let mut p = Provenance {
            source: Some("classifier".into()),
            producer: None,
            tier: Some("fast".into()),
        };
        p.merge_defaults("rule", "cap-cycles");
        assert_eq!(p.source.as_deref(), Some("classifier"));
        assert_eq!(p.producer.as_deref(), Some("cap-cycles"));
        assert_eq!(p.tier.as_deref(), Some("fast"));
    }

    #[test]
    fn fact_serde_tagging() {
        let fact = Fact::signal("intent", "question", 0.7);
        let json = serde_json::to_value(&fact).unwrap();
        assert_eq!(json["type"], "Signal");
        assert_eq!(json["dimension"], "intent");
        let back: Fact = serde_json::from_value(json).unwrap();
        assert_eq!(back, fact);
    }

    #[test]
    fn policy_blocked_defaults_false() {
        let json = serde_json::json!({
            "type": "ExecutionPlan",
            "plan": {"strategy": "direct", "role": "assistant"},
        });
        let fact: Fact = serde_json::from_value(json).unwrap();
        match fact {
            Fact::ExecutionPlan {
                policy_blocked,
                policy_adjusted,
                ..
            } => {
                assert!(!policy_blocked);
                assert!(!policy_adjusted);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
