//! The forward-chaining run loop.
//!
//! Rules fire salience-highest first. A rule becomes eligible again when
//! the working memory changed since its last firing; structurally duplicate
//! facts are not re-added, so well-behaved rule sets reach a fixed point in
//! a couple of passes. Rule sets that keep generating novel facts hit the
//! hard iteration cap and come back with `loop_detected`.

use std::collections::HashMap;
use std::time::Instant;

use ts_domain::fact::{Fact, FactMap};

use crate::rule::{FactBuilder, Rule};

/// Hard cap on matching passes.
pub const MAX_ITERATIONS: usize = 32;

/// Run metrics reported alongside the fact map.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    pub iterations: usize,
    pub duration_ms: u64,
    pub loop_detected: bool,
    pub error: Option<String>,
}

/// The engine's result: accumulated facts plus metrics.
#[derive(Debug)]
pub struct EngineOutcome {
    pub facts: FactMap,
    pub metrics: EngineMetrics,
}

/// Evaluate `rules` over `input_facts` to a fixed point (or the cap).
pub fn run_rules(rules: &[Rule], input_facts: Vec<Fact>) -> EngineOutcome {
    let start = Instant::now();
    let mut facts = FactMap::new();
    for fact in input_facts {
        facts.insert_unique(fact);
    }

    // Stable sort: salience descending, definition order within a tier.
    let mut ordered: Vec<&Rule> = rules.iter().collect();
    ordered.sort_by_key(|r| std::cmp::Reverse(r.salience));

    let mut generation: u64 = 0;
    let mut last_fired: HashMap<&str, u64> = HashMap::new();
    let mut metrics = EngineMetrics::default();

    while metrics.iterations < MAX_ITERATIONS {
        metrics.iterations += 1;
        let mut fired_any = false;

        for rule in &ordered {
            let eligible = last_fired
                .get(rule.name.as_str())
                .map_or(true, |&at| generation > at);
            if !eligible || !rule.conditions.matches(&facts) {
                continue;
            }

            last_fired.insert(rule.name.as_str(), generation);
            fired_any = true;

            let mut builder = FactBuilder::new(&rule.name);
            match (rule.action)(&facts, &mut builder) {
                Ok(()) => {
                    let mut added_new = false;
                    for fact in builder.into_added() {
                        if facts.insert_unique(fact) {
                            added_new = true;
                        }
                    }
                    if added_new {
                        generation += 1;
                    }
                }
                Err(e) => {
                    // Isolate the failure: keep accumulated facts, record
                    // the first error, and keep evaluating other rules.
                    tracing::warn!(rule = %rule.name, error = %e, "rule action failed");
                    if metrics.error.is_none() {
                        metrics.error = Some(format!("{}: {e}", rule.name));
                    }
                }
            }
        }

        if !fired_any {
            break;
        }
        if metrics.iterations == MAX_ITERATIONS {
            metrics.loop_detected = true;
        }
    }

    metrics.duration_ms = start.elapsed().as_millis() as u64;
    EngineOutcome { facts, metrics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ts_domain::fact::FactKind;
    use ts_domain::plan::Plan;

    use crate::condition::Condition;

    fn rule(name: &str, salience: i32, conditions: Condition, action: crate::rule::RuleAction) -> Rule {
        Rule::new(name, salience, conditions, action)
    }

    #[test]
    fn empty_rule_set_returns_input_facts() {
        let outcome = run_rules(&[], vec![Fact::signal("tone", "formal", 0.8)]);
        assert_eq!(outcome.facts.all(FactKind::Signal).len(), 1);
        assert_eq!(outcome.metrics.iterations, 1);
        assert!(!outcome.metrics.loop_detected);
        assert!(outcome.metrics.error.is_none());
    }

    #[test]
    fn salience_orders_firing() {
        let order: Arc<parking_lot_free::Order> = Arc::new(parking_lot_free::Order::default());

        let o1 = order.clone();
        let low = rule(
            "low",
            1,
            Condition::Always,
            Arc::new(move |_, _| {
                o1.push("low");
                Ok(())
            }),
        );
        let o2 = order.clone();
        let high = rule(
            "high",
            10,
            Condition::Always,
            Arc::new(move |_, _| {
                o2.push("high");
                Ok(())
            }),
        );

        run_rules(&[low, high], vec![]);
        assert_eq!(order.take(), vec!["high", "low"]);
    }

    /// Tiny helper: an ordered log without pulling a dependency into tests.
    mod parking_lot_free {
        use std::sync::Mutex;

        #[derive(Default)]
        pub struct Order(Mutex<Vec<&'static str>>);

        impl Order {
            pub fn push(&self, name: &'static str) {
                self.0.lock().unwrap().push(name);
            }
            pub fn take(&self) -> Vec<&'static str> {
                std::mem::take(&mut self.0.lock().unwrap())
            }
        }
    }

    #[test]
    fn added_facts_re_enter_matching() {
        // Rule A adds a plan when a signal exists; rule B reacts to plans.
        let add_plan = rule(
            "add-plan",
            5,
            Condition::HasKind(FactKind::Signal),
            Arc::new(|_, builder| {
                builder.add(Fact::ExecutionPlan {
                    plan: Plan::direct("assistant"),
                    confidence: Some(0.9),
                    policy_blocked: false,
                    policy_adjusted: false,
                    provenance: None,
                });
                Ok(())
            }),
        );
        let react = rule(
            "react-to-plan",
            1,
            Condition::HasKind(FactKind::ExecutionPlan),
            Arc::new(|_, builder| {
                builder.add(Fact::Derived {
                    name: "saw-plan".into(),
                    data: None,
                    provenance: None,
                });
                Ok(())
            }),
        );

        let outcome = run_rules(&[react, add_plan], vec![Fact::signal("tone", "formal", 0.8)]);
        assert!(outcome.facts.has(FactKind::ExecutionPlan));
        assert!(outcome.facts.has(FactKind::Derived));
        assert!(outcome.metrics.iterations <= MAX_ITERATIONS);
    }

    #[test]
    fn duplicate_facts_do_not_refire_forever() {
        let repeat = rule(
            "repeat",
            1,
            Condition::Always,
            Arc::new(|_, builder| {
                builder.add(Fact::Derived {
                    name: "same".into(),
                    data: None,
                    provenance: None,
                });
                Ok(())
            }),
        );
        let outcome = run_rules(&[repeat], vec![]);
        assert_eq!(outcome.facts.all(FactKind::Derived).len(), 1);
        assert!(!outcome.metrics.loop_detected);
        assert!(outcome.metrics.iterations < 5);
    }

    #[test]
    fn novel_fact_generators_hit_the_cap() {
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = counter.clone();
        let spin = rule(
            "spin",
            1,
            Condition::Always,
            Arc::new(move |_, builder| {
                let n = c.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                builder.add(Fact::Derived {
                    name: format!("novel-{n}"),
                    data: None,
                    provenance: None,
                });
                Ok(())
            }),
        );
        let outcome = run_rules(&[spin], vec![]);
        assert!(outcome.metrics.loop_detected);
        assert_eq!(outcome.metrics.iterations, MAX_ITERATIONS);
        // Whatever accumulated is preserved.
        assert!(!outcome.facts.all(FactKind::Derived).is_empty());
    }

    #[test]
    fn failing_rule_is_isolated() {
        let bad = rule(
            "bad",
            10,
            Condition::Always,
            Arc::new(|_, _| anyhow::bail!("boom")),
        );
        let good = rule(
            "good",
            1,
            Condition::Always,
            Arc::new(|_, builder| {
                builder.add(Fact::Derived {
                    name: "fine".into(),
                    data: None,
                    provenance: None,
                });
                Ok(())
            }),
        );

        let outcome = run_rules(&[bad, good], vec![Fact::signal("d", "s", 0.5)]);
        assert!(outcome.facts.has(FactKind::Derived), "good rule still fires");
        assert!(outcome.facts.has(FactKind::Signal), "input facts preserved");
        let error = outcome.metrics.error.unwrap();
        assert!(error.contains("bad"));
        assert!(error.contains("boom"));
    }

    #[test]
    fn rule_added_facts_carry_rule_provenance() {
        let adder = rule(
            "adder",
            1,
            Condition::Always,
            Arc::new(|_, builder| {
                builder.add(Fact::Derived {
                    name: "x".into(),
                    data: None,
                    provenance: None,
                });
                Ok(())
            }),
        );
        let outcome = run_rules(&[adder], vec![]);
        let fact = &outcome.facts.all(FactKind::Derived)[0];
        let provenance = fact.provenance().unwrap();
        assert_eq!(provenance.source.as_deref(), Some("rule"));
        assert_eq!(provenance.producer.as_deref(), Some("adder"));
    }
}
