//! Sequential execution — ordered steps, each a nested cycle.
//!
//! Three thread modes:
//! - accumulation: a running thread collects a plan overview, per-step
//!   markers, each step's composed framing, and each step's output;
//! - plain: each step sees the original thread plus the previous step's
//!   output;
//! - labeled (`build_thread`): each step (after the first) sees a single
//!   user message of labeled prior turns. Takes precedence over
//!   accumulation when both are set.
//!
//! Steps continue on failure; the failed step contributes an error marker.

use serde_json::json;

use ts_domain::boundary::BoundaryType;
use ts_domain::error::Error;
use ts_domain::event::names;
use ts_domain::plan::{Plan, ResultStrategy, Strategy};
use ts_domain::response::{BranchResult, FinishReason, Response, Usage};
use ts_domain::thread::{Thread, ThreadMessage};
use ts_module::PromptContext;

use crate::context::{CycleInput, CycleStatus, MachineContext};
use crate::cycle::run_cycle;
use crate::interrupt::{CycleError, Interrupt};
use crate::machine::ExecRequest;

use super::{error_marker, format_outputs, is_failed, label_outputs};

pub async fn exec_sequential(
    ctx: &MachineContext,
    req: ExecRequest,
) -> Result<Response, CycleError> {
    if ctx.cancel.is_cancelled() {
        return Err(CycleError::interrupted(Interrupt::at("execution.sequential")));
    }

    let steps = req
        .plan
        .sequence
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation("sequential plan has no sequence".into()))?;

    let build_thread = req.plan.build_thread.unwrap_or(false);
    // `build_thread` replaces the step thread wholesale, so accumulation is
    // unobservable under it.
    let accumulate = !build_thread && req.plan.thread_accumulation.unwrap_or(false);
    let result_strategy = req.plan.result_strategy.unwrap_or(ResultStrategy::Last);

    let parent = ctx.parent_boundary.clone();
    let boundary = ctx.emitter.boundary_start(
        &names::execution("sequential", "start"),
        BoundaryType::Execution,
        parent.as_deref(),
        Some(json!({
            "steps": steps.len(),
            "threadAccumulation": accumulate,
            "buildThread": build_thread,
        })),
    );

    let mut accumulated: Thread = req.thread.clone();
    if accumulate {
        let roles: Vec<&str> = steps.iter().map(|s| s.role.as_str()).collect();
        let overview = ctx
            .module
            .prompt("adapt.sequential-plan-overview", &PromptContext::default())
            .unwrap_or_else(|| format!("[Plan: {}]", roles.join(" → ")));
        accumulated.push(ThreadMessage::framing(overview));
    }

    let mut usage = Usage::default();
    let mut outputs: Vec<BranchResult> = Vec::new();
    let mut previous_output: Option<String> = None;
    let mut model = ctx.provider.provider_id().to_owned();

    for (index, step) in steps.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            let mut interrupt = Interrupt::at("execution.sequential");
            interrupt.thread = accumulated;
            return Err(CycleError::Interrupted(Box::new(interrupt)));
        }

        let step_boundary = ctx.emitter.boundary_start(
            &names::execution("sequential", "step_start"),
            BoundaryType::Step,
            Some(boundary.as_str()),
            Some(json!({"index": index, "role": step.role})),
        );

        // Steps default to `task`; tools are only honored for task steps.
        let strategy = step.strategy.unwrap_or(Strategy::Task);
        let mut sub_plan = Plan::direct(&step.role);
        sub_plan.strategy = strategy;
        if strategy == Strategy::Task {
            sub_plan.tools = step.tools.clone();
            sub_plan.resolution = req.plan.resolution.clone();
        }

        let step_start_marker = step_marker(ctx, "adapt.sequential-step-start", index, &step.role)
            .unwrap_or_else(|| format!("[Step {}: {}]", index + 1, step.role));

        let step_thread = if build_thread && !outputs.is_empty() {
            vec![ThreadMessage::user(label_outputs(&outputs))]
        } else if accumulate {
            accumulated.push(ThreadMessage::framing(step_start_marker.clone()));
            accumulated.clone()
        } else {
            let mut thread = req.thread.clone();
            if let Some(previous) = &previous_output {
                thread.push(ThreadMessage::framing(format!(
                    "Previous step output:\n{previous}"
                )));
            }
            thread
        };

        let child = ctx.child(&step_boundary);
        let input = CycleInput {
            thread: step_thread,
            forced_plan: Some(sub_plan),
            task_context: None,
            previous_output: previous_output.clone(),
        };
        let outcome = run_cycle(&child, input).await?;

        if outcome.status == CycleStatus::Interrupted {
            let interrupt = outcome
                .partial
                .unwrap_or_else(|| Interrupt::at("execution.sequential"));
            return Err(CycleError::Interrupted(Box::new(interrupt)));
        }

        let response = outcome
            .response
            .unwrap_or_else(|| Response::from_error("step produced no response", &model));
        usage.absorb(&response.usage);
        model = response.model.clone();

        let failed = is_failed(&response);
        let output = if failed {
            error_marker(&step.role, "step")
        } else {
            response.output.clone()
        };

        if accumulate {
            if let Some(framing) = outcome
                .instructions
                .as_ref()
                .map(|i| i.primary.clone())
                .filter(|p| !p.is_empty())
            {
                accumulated.push(ThreadMessage::framing(framing));
            }
            accumulated.push(ThreadMessage::assistant(output.clone()));
            let end_marker = step_marker(ctx, "adapt.sequential-step-end", index, &step.role)
                .unwrap_or_else(|| format!("[End of step {}]", index + 1));
            accumulated.push(ThreadMessage::framing(end_marker));
        }

        ctx.emitter.boundary_end(
            &names::execution(
                "sequential",
                if failed { "step_error" } else { "step_complete" },
            ),
            BoundaryType::Step,
            &step_boundary,
            Some(boundary.as_str()),
            Some(json!({
                "index": index,
                "role": step.role,
                "failed": failed,
            })),
        );

        previous_output = Some(output.clone());
        outputs.push(BranchResult {
            role: step.role.clone(),
            output,
        });
    }

    let output = match result_strategy {
        ResultStrategy::Last => outputs.last().map(|o| o.output.clone()).unwrap_or_default(),
        ResultStrategy::Concat => outputs
            .iter()
            .map(|o| o.output.clone())
            .collect::<Vec<_>>()
            .join("\n\n"),
        ResultStrategy::Label => label_outputs(&outputs),
        ResultStrategy::Formatted => format_outputs(ctx, &outputs),
    };

    ctx.emitter.boundary_end(
        &names::execution("sequential", "complete"),
        BoundaryType::Execution,
        &boundary,
        parent.as_deref(),
        Some(json!({"steps": outputs.len()})),
    );

    let mut response = Response::text(output, model, usage);
    response.finish_reason = FinishReason::Complete;
    response
        .metadata
        .insert("steps".into(), json!(outputs.len()));
    response
        .metadata
        .insert("strategy".into(), json!("sequential"));
    Ok(response)
}

fn step_marker(
    ctx: &MachineContext,
    key: &str,
    index: usize,
    role: &str,
) -> Option<String> {
    ctx.module.prompt(
        key,
        &PromptContext {
            role: role.to_owned(),
            cycle: Some(index as u32 + 1),
            max_cycles: None,
            data: json!({"index": index}),
        },
    )
}
