//! Approval arbiter — in-process rendezvous between a tool call about to
//! execute and an external decision.
//!
//! Each request parks on a oneshot channel until `resolve` completes it,
//! the timeout elapses (deny), or a housekeeping sweep denies it for age.
//! `timeout_ms = -1` waits indefinitely. Resolution is at-most-once:
//! a second `resolve` for the same id is a no-op. Timeouts never annotate
//! the journal, so approval hygiene does not pollute session state.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

/// Read-only snapshot of a pending approval.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalInfo {
    pub approval_id: String,
    pub tool: String,
    pub args: Value,
    pub session_id: String,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_boundary_id: Option<String>,
}

/// Outcome of one approval rendezvous.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub approved: bool,
    pub approval_id: String,
}

struct Pending {
    info: ApprovalInfo,
    respond: oneshot::Sender<bool>,
}

/// The single in-process approval table. Only the arbiter mutates it.
#[derive(Default)]
pub struct ApprovalArbiter {
    pending: Mutex<HashMap<String, Pending>>,
}

impl ApprovalArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a tool call until a decision arrives. A timeout (when one is
    /// set) resolves to deny.
    pub async fn request(
        &self,
        tool: &str,
        args: Value,
        session_id: &str,
        timeout_ms: i64,
        parent_boundary_id: Option<String>,
    ) -> ApprovalOutcome {
        let approval_id = uuid::Uuid::new_v4().to_string();
        let requested_at = Utc::now();
        let deadline = (timeout_ms >= 0)
            .then(|| requested_at + chrono::Duration::milliseconds(timeout_ms));

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            approval_id.clone(),
            Pending {
                info: ApprovalInfo {
                    approval_id: approval_id.clone(),
                    tool: tool.to_owned(),
                    args,
                    session_id: session_id.to_owned(),
                    requested_at,
                    deadline,
                    parent_boundary_id,
                },
                respond: tx,
            },
        );

        let approved = if timeout_ms < 0 {
            // Indefinite wait; a dropped sender (sweep) reads as deny.
            rx.await.unwrap_or(false)
        } else {
            match tokio::time::timeout(Duration::from_millis(timeout_ms as u64), rx).await {
                Ok(decision) => decision.unwrap_or(false),
                Err(_) => {
                    self.pending.lock().remove(&approval_id);
                    tracing::debug!(approval_id = %approval_id, tool, "approval timed out, denying");
                    false
                }
            }
        };

        ApprovalOutcome {
            approved,
            approval_id,
        }
    }

    /// Complete a pending approval. Idempotent: returns `false` when the
    /// id is unknown or already resolved.
    pub fn resolve(&self, approval_id: &str, approved: bool) -> bool {
        if let Some(pending) = self.pending.lock().remove(approval_id) {
            let _ = pending.respond.send(approved);
            return true;
        }
        false
    }

    /// Read-only probe of a pending entry.
    pub fn info(&self, approval_id: &str) -> Option<ApprovalInfo> {
        self.pending.lock().get(approval_id).map(|p| p.info.clone())
    }

    /// All currently pending approvals.
    pub fn list_pending(&self) -> Vec<ApprovalInfo> {
        self.pending.lock().values().map(|p| p.info.clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Spawn a housekeeping task that sweeps stale entries on an interval.
    /// Holds only a weak reference: the task ends when the arbiter drops.
    pub fn spawn_sweeper(
        self: std::sync::Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let arbiter = std::sync::Arc::downgrade(&self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(arbiter) = arbiter.upgrade() else {
                    return;
                };
                arbiter.sweep(max_age);
            }
        })
    }

    /// Auto-deny entries older than `max_age`. Returns how many were swept.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let expired: Vec<String> = self
            .pending
            .lock()
            .values()
            .filter(|p| p.info.requested_at < cutoff)
            .map(|p| p.info.approval_id.clone())
            .collect();
        let count = expired.len();
        for id in expired {
            self.resolve(&id, false);
        }
        if count > 0 {
            tracing::info!(count, "swept stale approvals");
        }
        count
    }
}
