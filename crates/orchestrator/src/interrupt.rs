//! Cooperative cancellation and the typed interrupt.
//!
//! A single scheduler-owned token is threaded through the cycle runner to
//! every handler. Handlers check it before blocking operations and raise
//! an [`Interrupt`] carrying whatever partial state they gathered. An
//! interrupt is a sentinel, not a failure: it is resolved by the cycle
//! runner, never by the fallback handler.

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use ts_domain::error::Error;
use ts_domain::thread::Thread;

/// Cloneable cancellation token with hierarchical children.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Safe to call more than once.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolve when cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// A child token: cancelled when the parent is, cancellable alone.
    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }
}

/// Partial-progress payload carried by a user interrupt.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interrupt {
    /// Where the interrupt was observed (stage or handler name).
    pub stage: String,
    pub cycle_count: u32,
    pub tokens_used: u32,
    pub tool_calls_executed: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub thread: Thread,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gathered_data: Option<Value>,
}

impl Interrupt {
    pub fn at(stage: &str) -> Self {
        Self {
            stage: stage.to_owned(),
            ..Self::default()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// How a pipeline or execution handler fails: a user interrupt (sentinel)
/// or a classified error (routed to the fallback handler).
#[derive(Debug)]
pub enum CycleError {
    Interrupted(Box<Interrupt>),
    Failed(Error),
}

impl CycleError {
    pub fn interrupted(interrupt: Interrupt) -> Self {
        Self::Interrupted(Box::new(interrupt))
    }
}

impl From<Error> for CycleError {
    fn from(error: Error) -> Self {
        Self::Failed(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_propagates_to_children() {
        let parent = CancelToken::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
        // Await resolves immediately once cancelled.
        child.cancelled().await;
    }

    #[tokio::test]
    async fn child_cancel_does_not_affect_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn interrupt_serializes_partial_state() {
        let mut interrupt = Interrupt::at("execution.task");
        interrupt.cycle_count = 2;
        interrupt.tokens_used = 1500;
        let value = interrupt.to_value();
        assert_eq!(value["stage"], "execution.task");
        assert_eq!(value["cycleCount"], 2);
        assert_eq!(value["tokensUsed"], 1500);
    }
}
