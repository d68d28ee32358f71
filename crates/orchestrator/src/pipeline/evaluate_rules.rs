//! Rule evaluation — module rules plus policy and enforcement rules.

use ts_domain::event::names;
use ts_engine::{run_rules, Rule};

use crate::context::{CycleState, MachineContext};
use crate::interrupt::{CycleError, Interrupt};
use crate::policy;

pub async fn evaluate_rules(
    ctx: &MachineContext,
    mut state: CycleState,
) -> Result<CycleState, CycleError> {
    if ctx.cancel.is_cancelled() {
        return Err(CycleError::interrupted(Interrupt::at("pipeline.rule_evaluation")));
    }

    let mut rules: Vec<Rule> = ctx.module.rules.clone();
    rules.extend(policy::policy_rules(&ctx.policy));
    rules.extend(policy::enforcement_rules());

    ctx.emitter.emit_data(
        names::PROCESSING_RULES_START,
        serde_json::json!({"rules": rules.len(), "facts": state.fact_map.len()}),
    );

    let input_facts: Vec<_> = state.fact_map.iter().cloned().collect();
    let outcome = run_rules(&rules, input_facts);

    ctx.emitter.emit_data(
        names::PROCESSING_RULES_COMPLETE,
        serde_json::json!({
            "iterations": outcome.metrics.iterations,
            "durationMs": outcome.metrics.duration_ms,
            "loopDetected": outcome.metrics.loop_detected,
            "error": outcome.metrics.error,
            "facts": outcome.facts.len(),
        }),
    );
    if let Some(error) = &outcome.metrics.error {
        tracing::warn!(error = %error, "rule evaluation reported an error");
    }

    state.fact_map = outcome.facts;
    state.engine_metrics = Some(outcome.metrics);
    Ok(state)
}
