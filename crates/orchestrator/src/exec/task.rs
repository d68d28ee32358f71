//! Task execution — the bounded multi-cycle loop.
//!
//! Each cycle is a nested direct cycle that may request tool calls; the
//! loop arbitrates them (approval rendezvous, transport dispatch), feeds
//! results back into the running thread, appends a progress report, and
//! enforces the resolution contract. A synthesis reserve keeps enough
//! tokens back for a final tool-free answer.

use std::time::Instant;

use serde_json::{json, Value};

use ts_domain::boundary::BoundaryType;
use ts_domain::event::names;
use ts_domain::plan::{Plan, Resolution};
use ts_domain::policy::DEFAULT_APPROVAL_TIMEOUT_MS;
use ts_domain::response::{FinishReason, Response, ToolRequest, Usage};
use ts_domain::thread::{Role, Thread, ThreadMessage};
use ts_module::PromptContext;
use ts_providers::ApiFlavor;
use ts_tools::{ToolCallRequest, ToolOutcome};

use crate::context::{CycleInput, CycleStatus, MachineContext, TaskContext};
use crate::cycle::run_cycle;
use crate::interrupt::{CycleError, Interrupt};
use crate::machine::ExecRequest;

// Resolution defaults.
const DEFAULT_MAX_CYCLES: u32 = 5;
const DEFAULT_MAX_TOKENS: u32 = 8_000;
const DEFAULT_MAX_TOOL_CALLS: u32 = 10;
const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Per-cycle output ceiling when the plan does not set one.
const DEFAULT_CYCLE_TOKENS: u32 = 2_000;

/// Tokens held back for the synthesis cycle.
const SYNTHESIS_RESERVE: u32 = 500;

/// Below this remaining budget the resource state reads `limited`.
const LIMITED_FLOOR: u32 = 800;

struct TaskState {
    cycle_count: u32,
    total_tokens: u32,
    total_tool_calls: u32,
    started: Instant,
    current_thread: Thread,
    last_response: Option<Response>,
    stopped_for_synthesis: bool,
}

impl TaskState {
    fn interrupt(&self, stage: &str) -> CycleError {
        let mut interrupt = Interrupt::at(stage);
        interrupt.cycle_count = self.cycle_count;
        interrupt.tokens_used = self.total_tokens;
        interrupt.tool_calls_executed = self.total_tool_calls;
        interrupt.thread = self.current_thread.clone();
        CycleError::Interrupted(Box::new(interrupt))
    }
}

pub async fn exec_task(ctx: &MachineContext, req: ExecRequest) -> Result<Response, CycleError> {
    let resolution = req.plan.resolution.clone().unwrap_or_default();
    let mut max_cycles = resolution.max_cycles.unwrap_or(DEFAULT_MAX_CYCLES);
    if let Some(cap) = ctx.policy.max_task_cycles {
        max_cycles = max_cycles.min(cap);
    }
    let max_tokens = resolution.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    let max_tool_calls = resolution.max_tool_calls.unwrap_or(DEFAULT_MAX_TOOL_CALLS);
    let timeout_ms = resolution.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);

    let parent = ctx.parent_boundary.clone();
    let boundary = ctx.emitter.boundary_start(
        &names::execution("task", "start"),
        BoundaryType::Execution,
        parent.as_deref(),
        Some(json!({
            "role": req.plan.role,
            "maxCycles": max_cycles,
            "maxTokens": max_tokens,
            "maxToolCalls": max_tool_calls,
            "timeoutMs": timeout_ms,
        })),
    );

    let mut state = TaskState {
        cycle_count: 0,
        total_tokens: 0,
        total_tool_calls: 0,
        started: Instant::now(),
        current_thread: req.thread.clone(),
        last_response: None,
        stopped_for_synthesis: false,
    };

    while state.cycle_count < max_cycles {
        // Pre-cycle checks.
        if ctx.cancel.is_cancelled() {
            ctx.emitter.emit_named(&names::execution("task", "interrupted"));
            return Err(state.interrupt("execution.task"));
        }
        if state.started.elapsed().as_millis() as u64 >= timeout_ms {
            ctx.emitter.emit_data(
                &names::execution("task", "budget_exceeded"),
                json!({"budget": "timeoutMs"}),
            );
            break;
        }
        if state.total_tool_calls >= max_tool_calls {
            ctx.emitter.emit_data(
                &names::execution("task", "budget_exceeded"),
                json!({"budget": "maxToolCalls"}),
            );
            break;
        }

        state.cycle_count += 1;
        let cycle_boundary = ctx.emitter.boundary_start(
            &names::execution("task", "cycle_start"),
            BoundaryType::Cycle,
            Some(boundary.as_str()),
            Some(json!({"cycle": state.cycle_count})),
        );

        // Nested direct cycle with the remaining-token cap.
        let cycle_tokens = DEFAULT_CYCLE_TOKENS
            .min(max_tokens.saturating_sub(state.total_tokens))
            .max(1);
        let mut sub_plan = Plan::direct(&req.plan.role);
        sub_plan.tools = req.plan.tools.clone();
        sub_plan.resolution = Some(Resolution {
            max_tokens: Some(cycle_tokens),
            ..Resolution::default()
        });
        let input = CycleInput {
            thread: state.current_thread.clone(),
            forced_plan: Some(sub_plan),
            task_context: Some(TaskContext {
                cycle: state.cycle_count,
                max_cycles,
                is_task: true,
            }),
            previous_output: None,
        };
        let child = ctx.child(&cycle_boundary);
        let outcome = run_cycle(&child, input).await?;
        if outcome.status == CycleStatus::Interrupted {
            return Err(state.interrupt("execution.task"));
        }
        let response = outcome.response.unwrap_or_else(|| {
            Response::from_error("cycle produced no response", ctx.provider.provider_id())
        });
        state.total_tokens += response.usage.total();

        // Thread the provider's raw items (or a plain assistant message).
        push_output_items(&mut state.current_thread, &response);

        // Arbitrate tool calls.
        if response.has_tool_calls() {
            if let Some(allowed) = req.plan.tools.as_deref() {
                let calls = response.tool_calls.clone().unwrap_or_default();
                for call in calls {
                    if ctx.cancel.is_cancelled() {
                        ctx.emitter.emit_named(&names::execution("task", "interrupted"));
                        return Err(state.interrupt("execution.task"));
                    }
                    state.total_tool_calls += 1;
                    let output = dispatch_tool_call(ctx, allowed, &call, &boundary).await;
                    push_tool_result(ctx, &mut state.current_thread, &call, &output);
                }
            }
        }

        // Progress report.
        let remaining = max_tokens.saturating_sub(state.total_tokens);
        let report = progress_report(
            ctx,
            state.cycle_count,
            max_cycles,
            state.total_tokens,
            remaining,
            max_tokens,
        );
        state.current_thread.push(ThreadMessage::user(report));

        ctx.emitter.boundary_end(
            &names::execution("task", "cycle_complete"),
            BoundaryType::Cycle,
            &cycle_boundary,
            Some(boundary.as_str()),
            Some(json!({
                "cycle": state.cycle_count,
                "finishReason": response.finish_reason,
                "totalTokens": state.total_tokens,
                "totalToolCalls": state.total_tool_calls,
            })),
        );

        let finish_reason = response.finish_reason;
        state.last_response = Some(response);

        // Continuation, then the synthesis reserve.
        if !finish_reason.is_continuation() {
            break;
        }
        if state.total_tokens >= max_tokens.saturating_sub(SYNTHESIS_RESERVE) {
            state.stopped_for_synthesis = true;
            break;
        }
    }

    // Forced synthesis: a tool round with no text to show, or the reserve.
    let last_reason = state.last_response.as_ref().map(|r| r.finish_reason);
    let no_text = state
        .last_response
        .as_ref()
        .map_or(true, |r| r.output.trim().is_empty());
    let needs_synthesis = state.stopped_for_synthesis
        || (last_reason.is_some_and(|r| r.is_tool_signal()) && no_text);

    if needs_synthesis && !ctx.cancel.is_cancelled() {
        let remaining = max_tokens.saturating_sub(state.total_tokens);
        let synthesis_tokens =
            1_000u32.max(2_000u32.min(if remaining == 0 { 2_000 } else { remaining }));

        let directive = ctx
            .module
            .prompt("adapt.task-synthesis", &PromptContext::default())
            .unwrap_or_else(|| {
                "Synthesize your findings so far into a final response for the user. \
                 Do not call any tools."
                    .into()
            });
        state.current_thread.push(ThreadMessage::user(directive));

        state.cycle_count += 1;
        let cycle_boundary = ctx.emitter.boundary_start(
            &names::execution("task", "cycle_start"),
            BoundaryType::Cycle,
            Some(boundary.as_str()),
            Some(json!({"cycle": state.cycle_count, "synthesis": true})),
        );

        let mut synth_plan = Plan::direct(&req.plan.role);
        synth_plan.resolution = Some(Resolution {
            max_tokens: Some(synthesis_tokens),
            ..Resolution::default()
        });
        let input = CycleInput {
            thread: state.current_thread.clone(),
            forced_plan: Some(synth_plan),
            task_context: Some(TaskContext {
                cycle: state.cycle_count,
                max_cycles,
                is_task: true,
            }),
            previous_output: None,
        };
        let child = ctx.child(&cycle_boundary);
        match run_cycle(&child, input).await? {
            outcome if outcome.status == CycleStatus::Interrupted => {
                return Err(state.interrupt("execution.task"));
            }
            outcome => {
                if let Some(response) = outcome.response {
                    state.total_tokens += response.usage.total();
                    state.last_response = Some(response);
                }
            }
        }
        ctx.emitter.boundary_end(
            &names::execution("task", "cycle_complete"),
            BoundaryType::Cycle,
            &cycle_boundary,
            Some(boundary.as_str()),
            Some(json!({"cycle": state.cycle_count, "synthesis": true})),
        );
    }

    // Final finish reason, first matching rule wins.
    let elapsed_ms = state.started.elapsed().as_millis() as u64;
    let final_reason = if state.cycle_count >= max_cycles {
        FinishReason::MaxCycles
    } else if state.total_tokens >= max_tokens {
        FinishReason::MaxTokens
    } else if elapsed_ms >= timeout_ms {
        FinishReason::Timeout
    } else if state.total_tool_calls >= max_tool_calls {
        FinishReason::MaxToolCalls
    } else {
        match last_reason {
            Some(reason) if !reason.is_continuation() => reason,
            _ => FinishReason::Complete,
        }
    };

    let mut response = state
        .last_response
        .take()
        .unwrap_or_else(|| Response::text("", ctx.provider.provider_id(), Usage::default()));
    response.finish_reason = final_reason;
    response.usage = aggregate_usage(state.total_tokens);
    response.metadata.insert("cycleCount".into(), json!(state.cycle_count));
    response.metadata.insert("totalTokens".into(), json!(state.total_tokens));
    response
        .metadata
        .insert("totalToolCalls".into(), json!(state.total_tool_calls));
    response.metadata.insert(
        "stoppedForSynthesis".into(),
        json!(state.stopped_for_synthesis),
    );

    ctx.emitter.boundary_end(
        &names::execution("task", "complete"),
        BoundaryType::Execution,
        &boundary,
        parent.as_deref(),
        Some(json!({
            "finishReason": final_reason,
            "cycleCount": state.cycle_count,
            "totalTokens": state.total_tokens,
            "totalToolCalls": state.total_tool_calls,
        })),
    );

    Ok(response)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn aggregate_usage(total_tokens: u32) -> Usage {
    // The per-cycle split is already journaled; the task-level response
    // reports the aggregate as completion-side spend.
    Usage {
        prompt: 0,
        completion: total_tokens,
    }
}

/// Append the provider's raw output items to the running thread, falling
/// back to a plain assistant message.
fn push_output_items(thread: &mut Thread, response: &Response) {
    if let Some(items) = &response.output_items {
        for item in items {
            let role = match item.get("type").and_then(Value::as_str) {
                Some("function_call") => Role::FunctionCall,
                _ => Role::Assistant,
            };
            thread.push(ThreadMessage::raw(role, item.clone()));
        }
        return;
    }
    if !response.output.is_empty() {
        thread.push(ThreadMessage::assistant(response.output.clone()));
    }
    // Chat-style providers without raw items: surface the calls themselves.
    for call in response.tool_calls.iter().flatten() {
        thread.push(ThreadMessage::raw(
            Role::FunctionCall,
            json!({
                "type": "function_call",
                "call_id": call.call_id,
                "name": call.tool,
                "arguments": call.args,
            }),
        ));
    }
}

/// Arbitrate and execute one tool call; always yields a thread-able outcome.
async fn dispatch_tool_call(
    ctx: &MachineContext,
    allowed: &[String],
    call: &ToolRequest,
    exec_boundary: &str,
) -> ToolOutcome {
    let tool_boundary = ctx.emitter.boundary_start(
        &names::execution("tool", "requested"),
        BoundaryType::Tool,
        Some(exec_boundary),
        Some(json!({"tool": call.tool, "callId": call.call_id})),
    );

    if !allowed.iter().any(|t| t == &call.tool) {
        ctx.emitter.boundary_end(
            &names::execution("tool", "denied"),
            BoundaryType::Tool,
            &tool_boundary,
            Some(exec_boundary),
            Some(json!({"tool": call.tool, "reason": "not in plan tools"})),
        );
        return ToolOutcome::failed(format!("tool '{}' is not allowed by the plan", call.tool));
    }

    if !ctx.policy.auto_approve_tools {
        ctx.emitter.emit_data(
            &names::execution("tool", "approval-requested"),
            json!({"tool": call.tool, "callId": call.call_id}),
        );
        let timeout_ms = match ctx.policy.approval_timeout_ms {
            0 => DEFAULT_APPROVAL_TIMEOUT_MS,
            other => other,
        };
        let decision = ctx
            .approvals
            .request(
                &call.tool,
                call.args.clone(),
                ctx.emitter.session_id(),
                timeout_ms,
                Some(tool_boundary.clone()),
            )
            .await;
        if !decision.approved {
            ctx.emitter.boundary_end(
                &names::execution("tool", "denied"),
                BoundaryType::Tool,
                &tool_boundary,
                Some(exec_boundary),
                Some(json!({"tool": call.tool, "approvalId": decision.approval_id})),
            );
            return ToolOutcome::failed(format!("tool call '{}' was denied", call.tool));
        }
        ctx.emitter.emit_data(
            &names::execution("tool", "approved"),
            json!({"tool": call.tool, "approvalId": decision.approval_id}),
        );
    }

    let outcome = match ctx
        .transport
        .call_tool(&ToolCallRequest {
            tool: call.tool.clone(),
            args: call.args.clone(),
        })
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => ToolOutcome::failed(e.to_string()),
    };

    ctx.emitter.boundary_end(
        &names::execution("tool", if outcome.success { "executed" } else { "error" }),
        BoundaryType::Tool,
        &tool_boundary,
        Some(exec_boundary),
        Some(json!({
            "tool": call.tool,
            "callId": call.call_id,
            "success": outcome.success,
        })),
    );
    outcome
}

/// Pair the tool result back into the thread in the provider's flavor.
fn push_tool_result(
    ctx: &MachineContext,
    thread: &mut Thread,
    call: &ToolRequest,
    outcome: &ToolOutcome,
) {
    let text = outcome.as_text();
    match ctx.provider.api_flavor() {
        ApiFlavor::Responses => thread.push(ThreadMessage::raw(
            Role::FunctionCallOutput,
            json!({
                "type": "function_call_output",
                "call_id": call.call_id,
                "output": text,
            }),
        )),
        ApiFlavor::Chat => thread.push(ThreadMessage::raw(
            Role::Tool,
            json!({
                "tool_call_id": call.call_id,
                "content": text,
            }),
        )),
    }
}

/// The per-cycle budget status message.
fn progress_report(
    ctx: &MachineContext,
    cycle: u32,
    max_cycles: u32,
    used: u32,
    remaining: u32,
    max_tokens: u32,
) -> String {
    let limited = remaining < LIMITED_FLOOR || remaining < max_tokens / 5;
    let resource_state = if limited { "limited" } else { "available" };

    let prompt_key = format!("adapt.task-progress-{resource_state}");
    let context = PromptContext {
        role: String::new(),
        cycle: Some(cycle),
        max_cycles: Some(max_cycles),
        data: json!({"usedTokens": used, "remainingTokens": remaining}),
    };

    let assessment = ctx.module.prompt(&prompt_key, &context).unwrap_or_else(|| {
        if limited {
            "Assessment: the token budget is nearly exhausted.".into()
        } else {
            "Assessment: budget remains for further work.".into()
        }
    });
    let guidance = if limited {
        "Guidance: wrap up now. Produce your best final answer without further tool calls."
    } else {
        "Guidance: continue if more work is needed, otherwise produce the final answer."
    };

    format!(
        "=== Task Progress Report ===\n\
         Cycle {cycle} of {max_cycles}.\n\
         Tokens: {used} used, {remaining} remaining ({resource_state}).\n\
         {assessment}\n\
         {guidance}"
    )
}
