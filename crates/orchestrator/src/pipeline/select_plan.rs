//! Plan selection.
//!
//! Preference ladder over the evaluated plans: the last viable plan that
//! carries tools, else the last viable plan, else a direct fallback on the
//! module's default role. Blocked shadow plans (confidence 0) are never
//! viable, so policy-refused strategies drop out here naturally. A nested
//! execution's forced plan short-circuits the ladder.

use ts_domain::fact::{Fact, FactKind, Provenance};
use ts_domain::plan::Plan;

use crate::context::{CycleState, MachineContext};
use crate::interrupt::{CycleError, Interrupt};

pub async fn select_plan(
    ctx: &MachineContext,
    mut state: CycleState,
) -> Result<CycleState, CycleError> {
    if ctx.cancel.is_cancelled() {
        return Err(CycleError::interrupted(Interrupt::at("pipeline.plan_selection")));
    }

    if let Some(forced) = state.input.forced_plan.clone() {
        state.plan = Some(forced);
        return Ok(state);
    }

    let candidates: Vec<&Plan> = state
        .fact_map
        .all(FactKind::ExecutionPlan)
        .iter()
        .filter_map(|fact| match fact {
            Fact::ExecutionPlan {
                plan,
                confidence,
                policy_blocked,
                ..
            } if !policy_blocked && confidence.unwrap_or(1.0) > 0.0 => Some(plan),
            _ => None,
        })
        .collect();

    let selected = candidates
        .iter()
        .rev()
        .find(|plan| plan.has_tools())
        .or_else(|| candidates.last())
        .map(|plan| (*plan).clone())
        .unwrap_or_else(|| {
            let role = ctx
                .module
                .default_role()
                .map(|r| r.name.clone())
                .unwrap_or_else(|| "assistant".into());
            Plan::direct(role)
        });

    state.fact_map.insert(Fact::SelectedPlan {
        plan: selected.clone(),
        confidence: None,
        provenance: Some(Provenance {
            source: Some("selection".into()),
            producer: Some("selectPlan".into()),
            tier: None,
        }),
    });
    state.plan = Some(selected);
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_domain::fact::FactKind;
    use ts_domain::plan::Strategy;

    use crate::context::{CycleInput, CycleState};
    use crate::testing;

    fn plan_fact(plan: Plan, blocked: bool, confidence: f64) -> Fact {
        Fact::ExecutionPlan {
            plan,
            confidence: Some(confidence),
            policy_blocked: blocked,
            policy_adjusted: false,
            provenance: None,
        }
    }

    fn state_with(facts: Vec<Fact>) -> CycleState {
        let mut state = CycleState::new(CycleInput::default());
        state.fact_map.extend(facts);
        state
    }

    #[tokio::test]
    async fn prefers_last_plan_with_tools() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        let with_tools = Plan::direct("researcher").with_tools(vec!["fetch".into()]);
        let later_plain = Plan::direct("writer");
        let state = state_with(vec![
            plan_fact(with_tools.clone(), false, 0.8),
            plan_fact(later_plain, false, 0.9),
        ]);

        let state = select_plan(&ctx, state).await.unwrap();
        assert_eq!(state.plan.unwrap(), with_tools);
    }

    #[tokio::test]
    async fn falls_back_to_last_plan_overall() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        let first = Plan::direct("a");
        let last = Plan::direct("b");
        let state = state_with(vec![
            plan_fact(first, false, 0.8),
            plan_fact(last.clone(), false, 0.8),
        ]);

        let state = select_plan(&ctx, state).await.unwrap();
        assert_eq!(state.plan.unwrap(), last);
    }

    #[tokio::test]
    async fn synthesizes_direct_fallback_without_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        let state = select_plan(&ctx, state_with(vec![])).await.unwrap();
        let plan = state.plan.unwrap();
        assert_eq!(plan.strategy, Strategy::Direct);
        assert_eq!(plan.role, "assistant");
        assert!(state.fact_map.has(FactKind::SelectedPlan));
    }

    #[tokio::test]
    async fn blocked_and_zero_confidence_plans_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        let viable = Plan::direct("keeper");
        let state = state_with(vec![
            plan_fact(viable.clone(), false, 0.5),
            plan_fact(Plan::direct("blocked"), true, 0.0),
            plan_fact(Plan::direct("zeroed"), false, 0.0),
        ]);

        let state = select_plan(&ctx, state).await.unwrap();
        assert_eq!(state.plan.unwrap(), viable);
    }

    #[tokio::test]
    async fn forced_plan_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        let forced = Plan::direct("forced-role");
        let mut state = state_with(vec![plan_fact(Plan::direct("other"), false, 0.9)]);
        state.input.forced_plan = Some(forced.clone());

        let state = select_plan(&ctx, state).await.unwrap();
        assert_eq!(state.plan.unwrap(), forced);
        assert!(
            !state.fact_map.has(FactKind::SelectedPlan),
            "forced plans do not re-enter selection"
        );
    }
}
