//! Policy rules and system enforcement.
//!
//! Policy rules (salience 90) watch the working memory and surface
//! `PolicyConstraint` / `ToolPolicyStatement` facts when a plan actually
//! breaches a knob. System enforcement rules (salience 100) react to the
//! constraints: hard breaches get a shadow copy of the offending plan with
//! `confidence = 0` and `policy_blocked = true` (which plan selection
//! ignores), while task-cycle overruns get a capped copy emitted after the
//! original so the selection ladder prefers it.

use std::sync::Arc;

use ts_domain::fact::{Fact, FactKind};
use ts_domain::plan::{Plan, Strategy};
use ts_domain::policy::Policy;
use ts_engine::{Condition, Rule};

const POLICY_SALIENCE: i32 = 90;
const ENFORCEMENT_SALIENCE: i32 = 100;

/// Non-blocked execution plans currently in working memory.
fn live_plans(facts: &ts_domain::fact::FactMap) -> Vec<&Plan> {
    facts
        .all(FactKind::ExecutionPlan)
        .iter()
        .filter_map(|fact| match fact {
            Fact::ExecutionPlan {
                plan,
                policy_blocked: false,
                policy_adjusted: false,
                ..
            } => Some(plan),
            _ => None,
        })
        .collect()
}

fn constraint_present(facts: &ts_domain::fact::FactMap, name: &str) -> bool {
    facts
        .all(FactKind::PolicyConstraint)
        .iter()
        .any(|fact| matches!(fact, Fact::PolicyConstraint { constraint, .. } if constraint == name))
}

fn constraint_limit(facts: &ts_domain::fact::FactMap, name: &str) -> Option<u32> {
    facts.all(FactKind::PolicyConstraint).iter().find_map(|fact| match fact {
        Fact::PolicyConstraint { constraint, limit, .. } if constraint == name => *limit,
        _ => None,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy rules — knobs into constraint facts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Derive constraint rules from the user policy. Constraints only appear
/// when a breaching plan actually exists in the working memory.
pub fn policy_rules(policy: &Policy) -> Vec<Rule> {
    let mut rules = Vec::new();

    if let Some(max_fanout) = policy.max_fanout {
        rules.push(Rule::new(
            "policy-max-fanout",
            POLICY_SALIENCE,
            Condition::PlanMatches(Arc::new(move |plan| plan.fanout() as u32 > max_fanout)),
            Arc::new(move |_, builder| {
                builder.add(Fact::PolicyConstraint {
                    constraint: "max_fanout".into(),
                    limit: Some(max_fanout),
                    data: None,
                    provenance: None,
                });
                Ok(())
            }),
        ));
    }

    if let Some(max_steps) = policy.max_sequential_steps {
        rules.push(Rule::new(
            "policy-max-sequential-steps",
            POLICY_SALIENCE,
            Condition::PlanMatches(Arc::new(move |plan| plan.step_count() as u32 > max_steps)),
            Arc::new(move |_, builder| {
                builder.add(Fact::PolicyConstraint {
                    constraint: "max_sequential_steps".into(),
                    limit: Some(max_steps),
                    data: None,
                    provenance: None,
                });
                Ok(())
            }),
        ));
    }

    if let Some(max_cycles) = policy.max_task_cycles {
        rules.push(Rule::new(
            "policy-max-task-cycles",
            POLICY_SALIENCE,
            Condition::PlanMatches(Arc::new(move |plan| {
                plan.strategy == Strategy::Task
                    && plan
                        .resolution
                        .as_ref()
                        .and_then(|r| r.max_cycles)
                        .is_some_and(|cycles| cycles > max_cycles)
            })),
            Arc::new(move |_, builder| {
                builder.add(Fact::PolicyConstraint {
                    constraint: "max_task_cycles".into(),
                    limit: Some(max_cycles),
                    data: None,
                    provenance: None,
                });
                Ok(())
            }),
        ));
    }

    if let Some(allowed) = policy.allowed_tools.clone() {
        rules.push(Rule::new(
            "policy-allowed-tools",
            POLICY_SALIENCE,
            Condition::PlanMatches(Arc::new({
                let allowed = allowed.clone();
                move |plan| {
                    plan.tools
                        .as_ref()
                        .is_some_and(|tools| tools.iter().any(|t| !allowed.contains(t)))
                }
            })),
            Arc::new(move |facts, builder| {
                for plan in live_plans(facts) {
                    for tool in plan.tools.iter().flatten() {
                        if !allowed.contains(tool) {
                            builder.add(Fact::ToolPolicyStatement {
                                tool: tool.clone(),
                                allowed: false,
                                provenance: None,
                            });
                        }
                    }
                }
                Ok(())
            }),
        ));
    }

    rules
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System enforcement — constraints into shadow plans
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Enforcement rules at salience 100.
pub fn enforcement_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "enforce-hard-breach",
            ENFORCEMENT_SALIENCE,
            Condition::Test(Arc::new(|facts| {
                constraint_present(facts, "max_fanout")
                    || constraint_present(facts, "max_sequential_steps")
            })),
            Arc::new(|facts, builder| {
                let fanout_limit = constraint_limit(facts, "max_fanout");
                let step_limit = constraint_limit(facts, "max_sequential_steps");
                for plan in live_plans(facts) {
                    let breaches = fanout_limit.is_some_and(|cap| plan.fanout() as u32 > cap)
                        || step_limit.is_some_and(|cap| plan.step_count() as u32 > cap);
                    if breaches {
                        builder.add(Fact::ExecutionPlan {
                            plan: plan.clone(),
                            confidence: Some(0.0),
                            policy_blocked: true,
                            policy_adjusted: false,
                            provenance: None,
                        });
                    }
                }
                Ok(())
            }),
        ),
        Rule::new(
            "enforce-task-cycle-cap",
            ENFORCEMENT_SALIENCE,
            Condition::Test(Arc::new(|facts| {
                constraint_present(facts, "max_task_cycles")
            })),
            Arc::new(|facts, builder| {
                let Some(cap) = constraint_limit(facts, "max_task_cycles") else {
                    return Ok(());
                };
                for plan in live_plans(facts) {
                    let over = plan.strategy == Strategy::Task
                        && plan
                            .resolution
                            .as_ref()
                            .and_then(|r| r.max_cycles)
                            .is_some_and(|cycles| cycles > cap);
                    if over {
                        let mut adjusted = plan.clone();
                        if let Some(resolution) = adjusted.resolution.as_mut() {
                            resolution.max_cycles = Some(cap);
                        }
                        builder.add(Fact::ExecutionPlan {
                            plan: adjusted,
                            confidence: Some(1.0),
                            policy_blocked: false,
                            policy_adjusted: true,
                            provenance: None,
                        });
                    }
                }
                Ok(())
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_domain::plan::{Resolution, SequenceStep};
    use ts_engine::run_rules;

    fn plan_fact(plan: Plan) -> Fact {
        Fact::ExecutionPlan {
            plan,
            confidence: Some(0.9),
            policy_blocked: false,
            policy_adjusted: false,
            provenance: None,
        }
    }

    #[test]
    fn fanout_breach_produces_constraint_and_shadow() {
        let policy = Policy {
            max_fanout: Some(2),
            ..Policy::default()
        };
        let mut plan = Plan::direct("coordinator");
        plan.strategy = Strategy::Parallel;
        plan.roles = Some(vec!["a".into(), "b".into(), "c".into()]);

        let mut rules = policy_rules(&policy);
        rules.extend(enforcement_rules());
        let outcome = run_rules(&rules, vec![plan_fact(plan)]);

        assert!(constraint_present(&outcome.facts, "max_fanout"));
        let blocked: Vec<_> = outcome
            .facts
            .all(FactKind::ExecutionPlan)
            .iter()
            .filter(|f| matches!(f, Fact::ExecutionPlan { policy_blocked: true, .. }))
            .collect();
        assert_eq!(blocked.len(), 1);
        // Invariant: blocked plans carry confidence zero.
        for fact in blocked {
            assert_eq!(fact.confidence(), Some(0.0));
        }
    }

    #[test]
    fn within_limits_produces_no_constraints() {
        let policy = Policy {
            max_fanout: Some(4),
            max_sequential_steps: Some(4),
            max_task_cycles: Some(10),
            ..Policy::default()
        };
        let mut plan = Plan::direct("coordinator");
        plan.strategy = Strategy::Parallel;
        plan.roles = Some(vec!["a".into(), "b".into()]);

        let mut rules = policy_rules(&policy);
        rules.extend(enforcement_rules());
        let outcome = run_rules(&rules, vec![plan_fact(plan)]);

        assert!(!outcome.facts.has(FactKind::PolicyConstraint));
        assert_eq!(outcome.facts.all(FactKind::ExecutionPlan).len(), 1);
    }

    #[test]
    fn task_cycle_overrun_gets_adjusted_copy() {
        let policy = Policy {
            max_task_cycles: Some(3),
            ..Policy::default()
        };
        let mut plan = Plan::direct("worker");
        plan.strategy = Strategy::Task;
        plan.resolution = Some(Resolution {
            max_cycles: Some(9),
            ..Resolution::default()
        });

        let mut rules = policy_rules(&policy);
        rules.extend(enforcement_rules());
        let outcome = run_rules(&rules, vec![plan_fact(plan)]);

        let adjusted: Vec<_> = outcome
            .facts
            .all(FactKind::ExecutionPlan)
            .iter()
            .filter_map(|f| match f {
                Fact::ExecutionPlan {
                    plan,
                    policy_adjusted: true,
                    ..
                } => Some(plan),
                _ => None,
            })
            .collect();
        assert_eq!(adjusted.len(), 1);
        assert_eq!(adjusted[0].resolution.as_ref().unwrap().max_cycles, Some(3));
        // The adjusted copy comes after the original, so the selection
        // ladder's "last" preference picks it.
        let all = outcome.facts.all(FactKind::ExecutionPlan);
        assert!(matches!(
            all.last().unwrap(),
            Fact::ExecutionPlan { policy_adjusted: true, .. }
        ));
    }

    #[test]
    fn disallowed_tool_statement_emitted() {
        let policy = Policy {
            allowed_tools: Some(vec!["fetch".into()]),
            ..Policy::default()
        };
        let plan = Plan::direct("worker").with_tools(vec!["fetch".into(), "exec".into()]);

        let rules = policy_rules(&policy);
        let outcome = run_rules(&rules, vec![plan_fact(plan)]);

        let statements = outcome.facts.all(FactKind::ToolPolicyStatement);
        assert_eq!(statements.len(), 1);
        assert!(matches!(
            &statements[0],
            Fact::ToolPolicyStatement { tool, allowed: false, .. } if tool == "exec"
        ));
    }
}
