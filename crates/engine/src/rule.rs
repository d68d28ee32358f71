//! Rules and the fact builder their actions write through.

use std::sync::Arc;

use ts_domain::fact::{Fact, Provenance};

use crate::condition::Condition;

/// An action receives the current working memory and a builder for new
/// facts. Errors are isolated per rule by the engine.
pub type RuleAction =
    Arc<dyn Fn(&ts_domain::fact::FactMap, &mut FactBuilder) -> anyhow::Result<()> + Send + Sync>;

/// A forward-chaining rule.
#[derive(Clone)]
pub struct Rule {
    pub name: String,
    /// Higher fires first.
    pub salience: i32,
    pub conditions: Condition,
    pub action: RuleAction,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        salience: i32,
        conditions: Condition,
        action: RuleAction,
    ) -> Self {
        Self {
            name: name.into(),
            salience,
            conditions,
            action,
        }
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("salience", &self.salience)
            .field("conditions", &self.conditions)
            .finish()
    }
}

/// Collects facts added by one rule firing and stamps provenance.
pub struct FactBuilder {
    rule_name: String,
    added: Vec<Fact>,
}

impl FactBuilder {
    pub fn new(rule_name: &str) -> Self {
        Self {
            rule_name: rule_name.to_owned(),
            added: Vec::new(),
        }
    }

    /// Add a fact. `{source: "rule", producer: <ruleName>}` is merged into
    /// its provenance without overwriting fields the action already set.
    pub fn add(&mut self, mut fact: Fact) {
        let provenance = fact.provenance_mut();
        let mut p = provenance.take().unwrap_or_default();
        p.merge_defaults("rule", &self.rule_name);
        *provenance = Some(p);
        self.added.push(fact);
    }

    pub fn added(&self) -> &[Fact] {
        &self.added
    }

    pub fn into_added(self) -> Vec<Fact> {
        self.added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_stamps_rule_provenance() {
        let mut builder = FactBuilder::new("pick-role");
        builder.add(Fact::signal("tone", "formal", 0.8));

        let provenance = builder.added()[0].provenance().unwrap();
        assert_eq!(provenance.source.as_deref(), Some("rule"));
        assert_eq!(provenance.producer.as_deref(), Some("pick-role"));
    }

    #[test]
    fn builder_keeps_custom_provenance_fields() {
        let mut builder = FactBuilder::new("pick-role");
        let fact = Fact::Signal {
            dimension: "tone".into(),
            signal: "formal".into(),
            confidence: 0.8,
            data: None,
            provenance: Some(Provenance {
                source: Some("classifier".into()),
                producer: None,
                tier: Some("fast".into()),
            }),
        };
        builder.add(fact);

        let provenance = builder.added()[0].provenance().unwrap();
        assert_eq!(provenance.source.as_deref(), Some("classifier"));
        assert_eq!(provenance.producer.as_deref(), Some("pick-role"));
        assert_eq!(provenance.tier.as_deref(), Some("fast"));
    }
}
