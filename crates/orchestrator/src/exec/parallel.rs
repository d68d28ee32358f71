//! Parallel execution — concurrent branches, one nested cycle per role.
//!
//! Branches are independent and may interleave their sub-events; each
//! branch nests its own boundaries. An interrupt aborts every outstanding
//! branch: values already produced are dropped in favor of the interrupt.

use futures_util::future::join_all;
use serde_json::json;

use ts_domain::boundary::BoundaryType;
use ts_domain::error::Error;
use ts_domain::event::names;
use ts_domain::plan::{Plan, ResultStrategy};
use ts_domain::response::{BranchResult, FinishReason, Response, Usage};

use crate::context::{CycleInput, CycleStatus, MachineContext};
use crate::cycle::run_cycle;
use crate::interrupt::{CycleError, Interrupt};
use crate::machine::ExecRequest;

use super::{error_marker, format_outputs, is_failed, label_outputs};

pub async fn exec_parallel(
    ctx: &MachineContext,
    req: ExecRequest,
) -> Result<Response, CycleError> {
    if ctx.cancel.is_cancelled() {
        return Err(CycleError::interrupted(Interrupt::at("execution.parallel")));
    }

    let roles = req
        .plan
        .roles
        .clone()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::Validation("parallel plan has no roles".into()))?;

    // Default fold: the module formatter when one exists, else labels.
    let result_strategy = req.plan.result_strategy.unwrap_or({
        if ctx.module.format_response.is_some() {
            ResultStrategy::Formatted
        } else {
            ResultStrategy::Label
        }
    });

    let parent = ctx.parent_boundary.clone();
    let boundary = ctx.emitter.boundary_start(
        &names::execution("parallel", "start"),
        BoundaryType::Execution,
        parent.as_deref(),
        Some(json!({"roles": roles})),
    );

    let branch_futures: Vec<_> = roles
        .iter()
        .map(|role| {
            let role = role.clone();
            let thread = req.thread.clone();
            let boundary = boundary.clone();
            async move {
                let branch_boundary = ctx.emitter.boundary_start(
                    &names::execution("parallel", "branch_start"),
                    BoundaryType::Branch,
                    Some(boundary.as_str()),
                    Some(json!({"role": role})),
                );
                let child = ctx.child(&branch_boundary);
                let outcome =
                    run_cycle(&child, CycleInput::forced(thread, Plan::direct(&role))).await;
                (role, branch_boundary, outcome)
            }
        })
        .collect();

    // Cancellation drops every in-flight branch future: outstanding
    // branches emit no branch_complete.
    let results = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            ctx.emitter.emit_named(&names::execution("parallel", "interrupted"));
            let mut interrupt = Interrupt::at("execution.parallel");
            interrupt.thread = req.thread;
            return Err(CycleError::Interrupted(Box::new(interrupt)));
        }
        results = join_all(branch_futures) => results,
    };

    let mut usage = Usage::default();
    let mut outputs: Vec<BranchResult> = Vec::new();
    let mut model = ctx.provider.provider_id().to_owned();

    for (role, branch_boundary, outcome) in results {
        match outcome {
            Err(CycleError::Interrupted(interrupt)) => {
                ctx.emitter.emit_named(&names::execution("parallel", "interrupted"));
                return Err(CycleError::Interrupted(interrupt));
            }
            Err(CycleError::Failed(e)) => {
                // run_cycle routes failures to the fallback handler, so this
                // arm only fires for failures of the runner itself.
                tracing::warn!(role = %role, error = %e, "branch failed outside the cycle");
                ctx.emitter.boundary_end(
                    &names::execution("parallel", "branch_error"),
                    BoundaryType::Branch,
                    &branch_boundary,
                    Some(boundary.as_str()),
                    Some(json!({"role": role, "error": e.to_string()})),
                );
                outputs.push(BranchResult {
                    role: role.clone(),
                    output: error_marker(&role, "branch"),
                });
            }
            Ok(outcome) => {
                if outcome.status == CycleStatus::Interrupted {
                    let interrupt = outcome
                        .partial
                        .unwrap_or_else(|| Interrupt::at("execution.parallel"));
                    return Err(CycleError::Interrupted(Box::new(interrupt)));
                }
                let response = outcome
                    .response
                    .unwrap_or_else(|| Response::from_error("branch produced no response", &model));
                usage.absorb(&response.usage);
                model = response.model.clone();

                let failed = is_failed(&response);
                ctx.emitter.boundary_end(
                    &names::execution(
                        "parallel",
                        if failed { "branch_error" } else { "branch_complete" },
                    ),
                    BoundaryType::Branch,
                    &branch_boundary,
                    Some(boundary.as_str()),
                    Some(json!({
                        "role": role,
                        "failed": failed,
                        "promptTokens": response.usage.prompt,
                        "completionTokens": response.usage.completion,
                    })),
                );
                outputs.push(BranchResult {
                    role: role.clone(),
                    output: if failed {
                        error_marker(&role, "branch")
                    } else {
                        response.output
                    },
                });
            }
        }
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
        &names::execution("parallel", "complete"),
        BoundaryType::Execution,
        &boundary,
        parent.as_deref(),
        Some(json!({"branches": outputs.len()})),
    );

    let mut response = Response::text(output, model, usage);
    response.finish_reason = FinishReason::Complete;
    response
        .metadata
        .insert("branches".into(), json!(outputs.len()));
    response
        .metadata
        .insert("strategy".into(), json!("parallel"));
    Ok(response)
}
