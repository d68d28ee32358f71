//! Policy check — the last gate before execution.
//!
//! Hard breaches (depth, fan-out, step count, disallowed tools) become
//! typed errors the state machine routes to the fallback handler.

use ts_domain::error::Error;
use ts_domain::plan::Plan;
use ts_domain::policy::Policy;

use crate::context::{CycleState, MachineContext};
use crate::interrupt::{CycleError, Interrupt};

pub async fn policy_check(
    ctx: &MachineContext,
    state: CycleState,
) -> Result<CycleState, CycleError> {
    if ctx.cancel.is_cancelled() {
        return Err(CycleError::interrupted(Interrupt::at("pipeline.policy_check")));
    }

    let Some(plan) = &state.plan else {
        return Err(Error::Validation("no plan to check".into()).into());
    };

    check_plan(plan, &ctx.policy, ctx.depth)?;
    Ok(state)
}

/// Apply the hard limits to one plan at one depth.
pub fn check_plan(plan: &Plan, policy: &Policy, depth: u32) -> Result<(), Error> {
    if let Some(max_depth) = policy.max_depth {
        if depth > max_depth {
            return Err(Error::Depth(format!("depth {depth} exceeds limit {max_depth}")));
        }
    }

    if let Some(max_fanout) = policy.max_fanout {
        let fanout = plan.fanout() as u32;
        if fanout > max_fanout {
            return Err(Error::Fanout(format!(
                "fanout {fanout} exceeds limit {max_fanout}"
            )));
        }
    }

    if let Some(max_steps) = policy.max_sequential_steps {
        let steps = plan.step_count() as u32;
        if steps > max_steps {
            return Err(Error::Children(format!(
                "{steps} sequential steps exceed limit {max_steps}"
            )));
        }
    }

    if let Some(tools) = &plan.tools {
        for tool in tools {
            if !policy.tool_allowed(tool) {
                return Err(Error::Tool {
                    tool: tool.clone(),
                    message: "tool is not in the allowed list".into(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_domain::error::ErrorKind;
    use ts_domain::plan::{SequenceStep, Strategy};

    fn policy() -> Policy {
        Policy {
            max_depth: Some(3),
            max_fanout: Some(2),
            max_sequential_steps: Some(2),
            allowed_tools: Some(vec!["fetch".into()]),
            ..Policy::default()
        }
    }

    #[test]
    fn depth_breach_is_e_depth() {
        let err = check_plan(&Plan::direct("a"), &policy(), 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Depth);
        assert!(check_plan(&Plan::direct("a"), &policy(), 3).is_ok());
    }

    #[test]
    fn fanout_breach_is_e_fanout() {
        let mut plan = Plan::direct("a");
        plan.strategy = Strategy::Parallel;
        plan.roles = Some(vec!["x".into(), "y".into(), "z".into()]);
        let err = check_plan(&plan, &policy(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fanout);
    }

    #[test]
    fn step_breach_is_e_children() {
        let mut plan = Plan::direct("a");
        plan.strategy = Strategy::Sequential;
        plan.sequence = Some(vec![
            SequenceStep::role("a"),
            SequenceStep::role("b"),
            SequenceStep::role("c"),
        ]);
        let err = check_plan(&plan, &policy(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Children);
    }

    #[test]
    fn disallowed_tool_is_e_tool() {
        let plan = Plan::direct("a").with_tools(vec!["exec".into()]);
        let err = check_plan(&plan, &policy(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tool);

        let plan = Plan::direct("a").with_tools(vec!["fetch".into()]);
        assert!(check_plan(&plan, &policy(), 0).is_ok());
    }

    #[test]
    fn unbounded_policy_allows_everything() {
        let mut plan = Plan::direct("a");
        plan.strategy = Strategy::Parallel;
        plan.roles = Some(vec!["x".into(); 50]);
        assert!(check_plan(&plan, &Policy::default(), 99).is_ok());
    }
}
