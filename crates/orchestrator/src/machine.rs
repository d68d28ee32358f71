//! The machine definition — stage order and the handler table.
//!
//! Handlers are function values in an explicit table, wired once in a
//! registration phase (core functions wrapped with middleware). No global
//! singletons: the table travels inside the machine context.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use ts_domain::error::ErrorKind;
use ts_domain::instructions::Instructions;
use ts_domain::plan::Plan;
use ts_domain::response::Response;
use ts_domain::thread::Thread;

use crate::context::{CycleState, MachineContext, TaskContext};
use crate::interrupt::CycleError;
use crate::middleware;
use crate::{exec, pipeline};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decision-plane stages, in machine order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DetectSignals,
    AggregateFacts,
    EvaluateRules,
    SelectPlan,
    ComposeInstructions,
    PolicyCheck,
}

impl Stage {
    /// Name used in `pipeline.<stage>.*` event names.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DetectSignals => "signal_detection",
            Self::AggregateFacts => "fact_aggregation",
            Self::EvaluateRules => "rule_evaluation",
            Self::SelectPlan => "plan_selection",
            Self::ComposeInstructions => "instruction_composition",
            Self::PolicyCheck => "policy_check",
        }
    }

    /// Wall-clock budget. Overruns warn, they do not fail.
    pub fn budget(&self) -> Option<Duration> {
        match self {
            Self::DetectSignals => Some(Duration::from_secs(10)),
            Self::AggregateFacts => Some(Duration::from_millis(50)),
            Self::EvaluateRules => Some(Duration::from_millis(100)),
            Self::SelectPlan => Some(Duration::from_millis(50)),
            Self::ComposeInstructions => None,
            Self::PolicyCheck => None,
        }
    }
}

/// Machine stage order.
pub const STAGES: [Stage; 6] = [
    Stage::DetectSignals,
    Stage::AggregateFacts,
    Stage::EvaluateRules,
    Stage::SelectPlan,
    Stage::ComposeInstructions,
    Stage::PolicyCheck,
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A pipeline stage handler: blackboard in, blackboard out.
pub type StageFn = Arc<
    dyn for<'a> Fn(&'a MachineContext, CycleState) -> BoxFuture<'a, Result<CycleState, CycleError>>
        + Send
        + Sync,
>;

/// Input to an execution handler.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub plan: Plan,
    pub instructions: Instructions,
    pub thread: Thread,
    pub task_context: Option<TaskContext>,
    pub previous_output: Option<String>,
}

/// An execution handler: request in, response out.
pub type ExecFn = Arc<
    dyn for<'a> Fn(&'a MachineContext, ExecRequest) -> BoxFuture<'a, Result<Response, CycleError>>
        + Send
        + Sync,
>;

/// Input to the fallback handler.
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    pub error_kind: ErrorKind,
    pub message: String,
    pub thread: Thread,
}

/// The fallback handler is total: it always produces a response.
pub type FallbackFn =
    Arc<dyn for<'a> Fn(&'a MachineContext, FallbackRequest) -> BoxFuture<'a, Response> + Send + Sync>;

/// The full handler table.
#[derive(Clone)]
pub struct HandlerTable {
    pub detect_signals: StageFn,
    pub aggregate_facts: StageFn,
    pub evaluate_rules: StageFn,
    pub select_plan: StageFn,
    pub compose_instructions: StageFn,
    pub policy_check: StageFn,
    pub exec_direct: ExecFn,
    pub exec_sequential: ExecFn,
    pub exec_parallel: ExecFn,
    pub exec_task: ExecFn,
    pub exec_fallback: FallbackFn,
}

impl HandlerTable {
    pub fn stage(&self, stage: Stage) -> &StageFn {
        match stage {
            Stage::DetectSignals => &self.detect_signals,
            Stage::AggregateFacts => &self.aggregate_facts,
            Stage::EvaluateRules => &self.evaluate_rules,
            Stage::SelectPlan => &self.select_plan,
            Stage::ComposeInstructions => &self.compose_instructions,
            Stage::PolicyCheck => &self.policy_check,
        }
    }
}

/// Stage order plus handlers.
pub struct MachineDefinition {
    pub stages: Vec<Stage>,
    pub handlers: HandlerTable,
}

impl MachineDefinition {
    /// The standard machine: core handlers wrapped with budget (outer) and
    /// logging (inner) middleware.
    pub fn standard() -> Self {
        fn stage(stage: Stage, core: StageFn) -> StageFn {
            middleware::instrument_stage(stage, core)
        }

        let handlers = HandlerTable {
            detect_signals: stage(
                Stage::DetectSignals,
                Arc::new(|ctx: &MachineContext, state: CycleState| {
                    Box::pin(pipeline::detect_signals(ctx, state))
                }),
            ),
            aggregate_facts: stage(
                Stage::AggregateFacts,
                Arc::new(|ctx: &MachineContext, state: CycleState| {
                    Box::pin(pipeline::aggregate_facts(ctx, state))
                }),
            ),
            evaluate_rules: stage(
                Stage::EvaluateRules,
                Arc::new(|ctx: &MachineContext, state: CycleState| {
                    Box::pin(pipeline::evaluate_rules(ctx, state))
                }),
            ),
            select_plan: stage(
                Stage::SelectPlan,
                Arc::new(|ctx: &MachineContext, state: CycleState| {
                    Box::pin(pipeline::select_plan(ctx, state))
                }),
            ),
            compose_instructions: stage(
                Stage::ComposeInstructions,
                Arc::new(|ctx: &MachineContext, state: CycleState| {
                    Box::pin(pipeline::compose_instructions(ctx, state))
                }),
            ),
            policy_check: stage(
                Stage::PolicyCheck,
                Arc::new(|ctx: &MachineContext, state: CycleState| {
                    Box::pin(pipeline::policy_check(ctx, state))
                }),
            ),
            exec_direct: Arc::new(|ctx: &MachineContext, req: ExecRequest| {
                Box::pin(exec::exec_direct(ctx, req))
            }),
            exec_sequential: Arc::new(|ctx: &MachineContext, req: ExecRequest| {
                Box::pin(exec::exec_sequential(ctx, req))
            }),
            exec_parallel: Arc::new(|ctx: &MachineContext, req: ExecRequest| {
                Box::pin(exec::exec_parallel(ctx, req))
            }),
            exec_task: Arc::new(|ctx: &MachineContext, req: ExecRequest| {
                Box::pin(exec::exec_task(ctx, req))
            }),
            exec_fallback: Arc::new(|ctx: &MachineContext, req: FallbackRequest| {
                Box::pin(exec::exec_fallback(ctx, req))
            }),
        };

        Self {
            stages: STAGES.to_vec(),
            handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_match_taxonomy() {
        assert_eq!(Stage::DetectSignals.name(), "signal_detection");
        assert_eq!(Stage::AggregateFacts.name(), "fact_aggregation");
        assert_eq!(Stage::EvaluateRules.name(), "rule_evaluation");
        assert_eq!(Stage::SelectPlan.name(), "plan_selection");
        assert_eq!(Stage::ComposeInstructions.name(), "instruction_composition");
        assert_eq!(Stage::PolicyCheck.name(), "policy_check");
    }

    #[test]
    fn budgets_follow_contract() {
        assert_eq!(Stage::DetectSignals.budget(), Some(Duration::from_secs(10)));
        assert_eq!(Stage::AggregateFacts.budget(), Some(Duration::from_millis(50)));
        assert_eq!(Stage::EvaluateRules.budget(), Some(Duration::from_millis(100)));
        assert_eq!(Stage::SelectPlan.budget(), Some(Duration::from_millis(50)));
        assert_eq!(Stage::ComposeInstructions.budget(), None);
    }

    #[test]
    fn standard_machine_runs_all_stages_in_order() {
        let machine = MachineDefinition::standard();
        assert_eq!(machine.stages, STAGES.to_vec());
    }
}
