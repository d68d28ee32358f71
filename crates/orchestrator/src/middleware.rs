//! Handler middleware — budget outer, logging inner.
//!
//! Logging emits `pipeline.<stage>.{start, complete, failed}` around the
//! core handler. The budget wrapper measures wall clock and converts
//! overruns into performance warnings, never failures.

use std::sync::Arc;
use std::time::Instant;

use ts_domain::boundary::BoundaryType;
use ts_domain::event::names;

use crate::interrupt::CycleError;
use crate::machine::{Stage, StageFn};

/// Wrap a core stage handler: `budget(logging(core))`.
pub fn instrument_stage(stage: Stage, core: StageFn) -> StageFn {
    let logged = logging(stage, core);
    budget(stage, logged)
}

/// Inner wrapper: start/complete/failed events with a pipeline boundary.
fn logging(stage: Stage, core: StageFn) -> StageFn {
    Arc::new(move |ctx: &crate::context::MachineContext, state| {
        let core = core.clone();
        Box::pin(async move {
            let parent = ctx.parent_boundary.clone();
            let boundary = ctx.emitter.boundary_start(
                &names::pipeline(stage.name(), "start"),
                BoundaryType::Pipeline,
                parent.as_deref(),
                None,
            );

            let result = core(ctx, state).await;

            match &result {
                Ok(_) => ctx.emitter.boundary_end(
                    &names::pipeline(stage.name(), "complete"),
                    BoundaryType::Pipeline,
                    &boundary,
                    parent.as_deref(),
                    None,
                ),
                Err(CycleError::Failed(error)) => ctx.emitter.boundary_end(
                    &names::pipeline(stage.name(), "failed"),
                    BoundaryType::Pipeline,
                    &boundary,
                    parent.as_deref(),
                    Some(serde_json::json!({
                        "error": error.to_string(),
                        "kind": error.kind().code(),
                    })),
                ),
                Err(CycleError::Interrupted(_)) => ctx.emitter.boundary_end(
                    &names::pipeline(stage.name(), "failed"),
                    BoundaryType::Pipeline,
                    &boundary,
                    parent.as_deref(),
                    Some(serde_json::json!({"interrupted": true})),
                ),
            }
            result
        })
    })
}

/// Outer wrapper: wall-clock deadline that downgrades overruns to warnings.
fn budget(stage: Stage, inner: StageFn) -> StageFn {
    Arc::new(move |ctx: &crate::context::MachineContext, state| {
        let inner = inner.clone();
        Box::pin(async move {
            let started = Instant::now();
            let result = inner(ctx, state).await;

            if let Some(budget) = stage.budget() {
                let elapsed = started.elapsed();
                if elapsed > budget {
                    tracing::warn!(
                        stage = stage.name(),
                        budget_ms = budget.as_millis() as u64,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "stage exceeded budget"
                    );
                    ctx.emitter.emit_data(
                        names::SYSTEM_PERFORMANCE_WARNING,
                        serde_json::json!({
                            "stage": stage.name(),
                            "budgetMs": budget.as_millis() as u64,
                            "elapsedMs": elapsed.as_millis() as u64,
                        }),
                    );
                }
            }
            result
        })
    })
}
