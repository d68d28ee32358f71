//! The cycle runner — one decision→execution pass.
//!
//! Single entry point for the scheduler and for nested executions. Drives
//! the state machine's stages, dispatches the selected plan's execution
//! handler, routes classified errors through the fallback handler, and
//! resolves interrupts into an `interrupted` outcome with partial data.

use serde_json::json;

use ts_domain::boundary::BoundaryType;
use ts_domain::event::names;
use ts_domain::plan::{Plan, Strategy};

use crate::context::{CycleInput, CycleOutcome, CycleState, MachineContext};
use crate::interrupt::CycleError;
use crate::machine::{ExecRequest, FallbackRequest};

pub async fn run_cycle(
    ctx: &MachineContext,
    input: CycleInput,
) -> Result<CycleOutcome, CycleError> {
    let parent = ctx.parent_boundary.clone();
    let orchestration = ctx.emitter.boundary_start(
        names::ORCHESTRATION_START,
        BoundaryType::Orchestration,
        parent.as_deref(),
        Some(json!({"depth": ctx.depth})),
    );
    let cycle_ctx = ctx.with_parent(&orchestration);

    let close = |event: &str, data: serde_json::Value| {
        cycle_ctx.emitter.boundary_end(
            event,
            BoundaryType::Orchestration,
            &orchestration,
            parent.as_deref(),
            Some(data),
        );
    };

    // ── Decision plane ───────────────────────────────────────────
    let mut state = CycleState::new(input);
    for stage in cycle_ctx.machine.stages.clone() {
        let handler = cycle_ctx.machine.handlers.stage(stage).clone();
        match handler(&cycle_ctx, state).await {
            Ok(next) => state = next,
            Err(CycleError::Interrupted(interrupt)) => {
                close(names::ORCHESTRATION_ERROR, json!({"interrupted": true}));
                return Ok(CycleOutcome::interrupted(*interrupt));
            }
            Err(CycleError::Failed(error)) => {
                close(
                    names::ORCHESTRATION_ERROR,
                    json!({"error": error.to_string(), "kind": error.kind().code()}),
                );
                let response = (cycle_ctx.machine.handlers.exec_fallback)(
                    &cycle_ctx,
                    FallbackRequest {
                        error_kind: error.kind(),
                        message: error.to_string(),
                        thread: Vec::new(),
                    },
                )
                .await;
                return Ok(CycleOutcome::completed(response));
            }
        }
    }

    // ── Execution plane ──────────────────────────────────────────
    let plan = state.plan.clone().unwrap_or_else(|| Plan::direct("assistant"));
    let instructions = state.instructions.clone().unwrap_or_else(|| {
        ts_module::default_instructions(&cycle_ctx.module, &plan.role)
    });
    let request = ExecRequest {
        plan: plan.clone(),
        instructions: instructions.clone(),
        thread: state.input.thread.clone(),
        task_context: state.input.task_context,
        previous_output: state.input.previous_output.clone(),
    };

    let exec = match plan.strategy {
        Strategy::Direct => cycle_ctx.machine.handlers.exec_direct.clone(),
        Strategy::Sequential => cycle_ctx.machine.handlers.exec_sequential.clone(),
        Strategy::Parallel => cycle_ctx.machine.handlers.exec_parallel.clone(),
        Strategy::Task => cycle_ctx.machine.handlers.exec_task.clone(),
        Strategy::Fallback => {
            let response = (cycle_ctx.machine.handlers.exec_fallback)(
                &cycle_ctx,
                FallbackRequest {
                    error_kind: ts_domain::error::ErrorKind::Unknown,
                    message: "fallback strategy selected".into(),
                    thread: state.input.thread.clone(),
                },
            )
            .await;
            close(names::ORCHESTRATION_COMPLETE, json!({"strategy": "fallback"}));
            let mut outcome = CycleOutcome::completed(response);
            outcome.instructions = Some(instructions);
            return Ok(outcome);
        }
    };

    match exec(&cycle_ctx, request).await {
        Ok(response) => {
            close(
                names::ORCHESTRATION_COMPLETE,
                json!({"strategy": plan.strategy.as_str()}),
            );
            let mut outcome = CycleOutcome::completed(response);
            outcome.instructions = Some(instructions);
            Ok(outcome)
        }
        Err(CycleError::Interrupted(interrupt)) => {
            close(names::ORCHESTRATION_ERROR, json!({"interrupted": true}));
            let mut interrupt = *interrupt;
            if interrupt.thread.is_empty() {
                interrupt.thread = state.input.thread.clone();
            }
            Ok(CycleOutcome::interrupted(interrupt))
        }
        Err(CycleError::Failed(error)) => {
            close(
                names::ORCHESTRATION_ERROR,
                json!({"error": error.to_string(), "kind": error.kind().code()}),
            );
            let response = (cycle_ctx.machine.handlers.exec_fallback)(
                &cycle_ctx,
                FallbackRequest {
                    error_kind: error.kind(),
                    message: error.to_string(),
                    thread: state.input.thread.clone(),
                },
            )
            .await;
            let mut outcome = CycleOutcome::completed(response);
            outcome.instructions = Some(instructions);
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_domain::thread::ThreadMessage;

    use crate::context::CycleStatus;
    use crate::testing;

    #[tokio::test]
    async fn direct_cycle_completes_with_echo() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        let input = CycleInput::for_thread(vec![ThreadMessage::user("ping")]);
        let outcome = run_cycle(&ctx, input).await.unwrap();

        assert_eq!(outcome.status, CycleStatus::Completed);
        assert_eq!(outcome.response.unwrap().output, "echo: ping");
        assert!(outcome.instructions.is_some());

        let events = testing::fixture_events(dir.path());
        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert!(names.contains(&"orchestration.start"));
        assert!(names.contains(&"orchestration.complete"));
        assert!(names.contains(&"execution.direct.start"));
        assert!(names.contains(&"execution.direct.complete"));
    }

    #[tokio::test]
    async fn cancelled_cycle_resolves_to_interrupted_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());
        ctx.cancel.cancel();

        let input = CycleInput::for_thread(vec![ThreadMessage::user("ping")]);
        let outcome = run_cycle(&ctx, input).await.unwrap();

        assert_eq!(outcome.status, CycleStatus::Interrupted);
        let partial = outcome.partial.unwrap();
        assert!(partial.stage.starts_with("pipeline."));
    }

    #[tokio::test]
    async fn depth_breach_routes_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = testing::context(dir.path());
        ctx.policy.max_depth = Some(1);
        ctx.depth = 5;

        let input = CycleInput::for_thread(vec![ThreadMessage::user("deep")]);
        let outcome = run_cycle(&ctx, input).await.unwrap();

        // The breach completes through the fallback handler.
        assert_eq!(outcome.status, CycleStatus::Completed);
        let response = outcome.response.unwrap();
        assert_eq!(response.metadata["errorKind"], "E_DEPTH");
        assert!(response.error.is_some());
    }
}
