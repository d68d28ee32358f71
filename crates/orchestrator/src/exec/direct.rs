//! Direct execution — one provider call.
//!
//! The composed system text (system prompt plus adaptations) becomes the
//! system message; the primary prompt is prepended to the final user
//! message. Provider errors become a response with `error` set; they never
//! propagate past this handler.

use serde_json::json;

use ts_domain::boundary::BoundaryType;
use ts_domain::event::names;
use ts_domain::response::Response;
use ts_domain::thread::{last_user_index, ThreadMessage};
use ts_providers::ProviderRequest;

use crate::context::MachineContext;
use crate::interrupt::{CycleError, Interrupt};
use crate::machine::ExecRequest;

pub async fn exec_direct(
    ctx: &MachineContext,
    req: ExecRequest,
) -> Result<Response, CycleError> {
    if ctx.cancel.is_cancelled() {
        return Err(CycleError::interrupted(Interrupt::at("execution.direct")));
    }

    let parent = ctx.parent_boundary.clone();
    let boundary = ctx.emitter.boundary_start(
        &names::execution("direct", "start"),
        BoundaryType::Execution,
        parent.as_deref(),
        Some(json!({"role": req.plan.role})),
    );

    // Primary prompt joins the final user message.
    let mut thread = req.thread.clone();
    if !req.instructions.primary.is_empty() {
        match last_user_index(&thread) {
            Some(index) => {
                let original = thread[index].text().unwrap_or_default().to_owned();
                thread[index] = ThreadMessage::user(if original.is_empty() {
                    req.instructions.primary.clone()
                } else {
                    format!("{}\n\n{}", req.instructions.primary, original)
                });
            }
            None => thread.push(ThreadMessage::user(req.instructions.primary.clone())),
        }
    }

    let tools = req
        .plan
        .tools
        .as_deref()
        .map(|names| ctx.tool_specs(names))
        .unwrap_or_default();

    // A per-call token cap on the plan overrides the composed budget.
    let max_tokens = req
        .plan
        .resolution
        .as_ref()
        .and_then(|r| r.max_tokens)
        .unwrap_or(req.instructions.max_tokens);

    let request = ProviderRequest {
        system: req.instructions.system_text(),
        thread,
        tools,
        temperature: Some(ctx.module.temperature_for(&req.plan.role)),
        max_tokens,
        model: ctx.config.model.clone(),
    };

    let llm_boundary = ctx.emitter.boundary_start(
        names::PROCESSING_LLM_START,
        BoundaryType::LlmExchange,
        Some(boundary.as_str()),
        Some(json!({
            "provider": ctx.provider.provider_id(),
            "messages": request.thread.len(),
            "tools": request.tools.len(),
            "maxTokens": request.max_tokens,
        })),
    );

    ctx.emitter.emit_data(
        names::PROVIDER_API_RAW_REQUEST,
        json!({
            "model": request.model,
            "system": request.system,
            "messages": request.thread.len(),
            "temperature": request.temperature,
            "maxTokens": request.max_tokens,
        }),
    );

    let response = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            let mut interrupt = Interrupt::at("execution.direct");
            interrupt.thread = req.thread;
            ctx.emitter.emit_named(&names::execution("direct", "interrupted"));
            return Err(CycleError::Interrupted(Box::new(interrupt)));
        }
        result = ctx.provider.chat(request) => match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "provider call failed");
                Response::from_error(e.to_string(), ctx.provider.provider_id())
            }
        },
    };

    ctx.emitter.emit_data(
        names::PROVIDER_API_RAW_RESPONSE,
        json!({
            "model": response.model,
            "finishReason": response.finish_reason,
            "usage": response.usage,
            "toolCalls": response.tool_calls.as_ref().map_or(0, Vec::len),
        }),
    );

    ctx.emitter.boundary_end(
        names::PROCESSING_LLM_COMPLETE,
        BoundaryType::LlmExchange,
        &llm_boundary,
        Some(boundary.as_str()),
        Some(json!({
            "finishReason": response.finish_reason,
            "promptTokens": response.usage.prompt,
            "completionTokens": response.usage.completion,
            "error": response.error,
        })),
    );

    ctx.emitter.boundary_end(
        &names::execution("direct", "complete"),
        BoundaryType::Execution,
        &boundary,
        parent.as_deref(),
        Some(json!({"finishReason": response.finish_reason})),
    );

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_domain::instructions::{InstructionMetadata, Instructions};
    use ts_domain::plan::Plan;

    use crate::testing;

    fn instructions(primary: &str) -> Instructions {
        Instructions {
            system: "System prompt.".into(),
            primary: primary.into(),
            adaptations: "Adapt.".into(),
            length_guidance: String::new(),
            tool_instructions: String::new(),
            max_tokens: 500,
            metadata: InstructionMetadata {
                role: "assistant".into(),
                base_tokens: 500,
                token_multiplier: 1.0,
                length_level: "standard".into(),
                adaptation_keys: Vec::new(),
                strategy: None,
                tools_available: None,
            },
        }
    }

    fn request(primary: &str, thread: Vec<ThreadMessage>) -> ExecRequest {
        ExecRequest {
            plan: Plan::direct("assistant"),
            instructions: instructions(primary),
            thread,
            task_context: None,
            previous_output: None,
        }
    }

    #[tokio::test]
    async fn primary_prompt_prepends_to_final_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        // The echo provider reflects the last textual message back, which
        // exposes the rewritten user message.
        let response = exec_direct(
            &ctx,
            request("Answer briefly.", vec![ThreadMessage::user("what is up")]),
        )
        .await
        .unwrap();

        assert_eq!(response.output, "echo: Answer briefly.\n\nwhat is up");
    }

    #[tokio::test]
    async fn empty_thread_gains_a_primary_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        let response = exec_direct(&ctx, request("Start here.", Vec::new()))
            .await
            .unwrap();
        assert_eq!(response.output, "echo: Start here.");
    }

    #[tokio::test]
    async fn cancelled_call_raises_interrupt() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());
        ctx.cancel.cancel();

        let result = exec_direct(
            &ctx,
            request("", vec![ThreadMessage::user("never sent")]),
        )
        .await;
        assert!(matches!(result, Err(CycleError::Interrupted(_))));
    }

    #[tokio::test]
    async fn llm_exchange_events_bracket_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        exec_direct(&ctx, request("", vec![ThreadMessage::user("hi")]))
            .await
            .unwrap();

        let events = testing::fixture_events(dir.path());
        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert!(names.contains(&"processing.llm.start"));
        assert!(names.contains(&"provider.api.raw_request"));
        assert!(names.contains(&"provider.api.raw_response"));
        assert!(names.contains(&"processing.llm.complete"));
    }
}
