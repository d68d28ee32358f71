//! Execution-plane handlers.

mod direct;
mod fallback;
mod parallel;
mod sequential;
mod task;

pub use direct::exec_direct;
pub use fallback::exec_fallback;
pub use parallel::exec_parallel;
pub use sequential::exec_sequential;
pub use task::exec_task;

use ts_domain::response::{BranchResult, Response};

use crate::context::MachineContext;

/// Fold branch outputs with the `label` strategy: `[role]: output` blocks.
pub(crate) fn label_outputs(results: &[BranchResult]) -> String {
    results
        .iter()
        .map(|r| format!("[{}]: {}", r.role, r.output))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Fold branch outputs with the module formatter when present, else label.
pub(crate) fn format_outputs(ctx: &MachineContext, results: &[BranchResult]) -> String {
    match &ctx.module.format_response {
        Some(formatter) => formatter(results),
        None => label_outputs(results),
    }
}

/// The output recorded for a failed step or branch.
pub(crate) fn error_marker(role: &str, unit: &str) -> String {
    format!("[Error in {role} {unit}]")
}

/// Whether a completed cycle's response represents a failure.
pub(crate) fn is_failed(response: &Response) -> bool {
    response.error.is_some()
}
