//! Journal events.
//!
//! One JSON object per line in a session's journal file. Event names follow
//! the `domain.component.action` taxonomy; the constants below are the only
//! names the core emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::boundary::BoundaryType;

/// A single journal event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub time: DateTime<Utc>,
    pub event: String,
    pub session_id: String,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_boundary_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary_type: Option<BoundaryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl Event {
    pub fn new(event: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            event: event.into(),
            session_id: session_id.into(),
            event_id: uuid::Uuid::new_v4().to_string(),
            trace_id: None,
            boundary_id: None,
            parent_boundary_id: None,
            event_role: None,
            boundary_type: None,
            data: None,
            msg: None,
            pid: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_boundary(
        mut self,
        boundary_type: BoundaryType,
        boundary_id: impl Into<String>,
        parent: Option<&str>,
    ) -> Self {
        self.boundary_type = Some(boundary_type);
        self.boundary_id = Some(boundary_id.into());
        self.parent_boundary_id = parent.map(str::to_owned);
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

/// Event-name constants, grouped by domain.
pub mod names {
    // session.*
    pub const SESSION_PENDING: &str = "session.pending";
    pub const SESSION_INPUT: &str = "session.input";
    pub const SESSION_RESPONSE: &str = "session.response";
    pub const SESSION_END: &str = "session.end";
    pub const SESSION_RESUME: &str = "session.resume";
    pub const SESSION_FORKED: &str = "session.forked";
    pub const SESSION_INTERRUPTED: &str = "session.interrupted";
    pub const SESSION_TURN_START: &str = "session.turn.start";
    pub const SESSION_TURN_COMPLETE: &str = "session.turn.complete";

    // orchestration.*
    pub const ORCHESTRATION_START: &str = "orchestration.start";
    pub const ORCHESTRATION_COMPLETE: &str = "orchestration.complete";
    pub const ORCHESTRATION_ERROR: &str = "orchestration.error";

    // system.*
    pub const SYSTEM_ERROR: &str = "system.error";
    pub const SYSTEM_WARNING: &str = "system.warning";
    pub const SYSTEM_METRIC: &str = "system.metric";
    pub const SYSTEM_PERFORMANCE_WARNING: &str = "system.performance.warning";
    pub const SYSTEM_BUDGET_EXCEEDED: &str = "system.budget.exceeded";

    // processing.*
    pub const PROCESSING_CLASSIFIER_START: &str = "processing.classifier.start";
    pub const PROCESSING_CLASSIFIER_COMPLETE: &str = "processing.classifier.complete";
    pub const PROCESSING_LLM_START: &str = "processing.llm.start";
    pub const PROCESSING_LLM_COMPLETE: &str = "processing.llm.complete";
    pub const PROCESSING_RULES_START: &str = "processing.rules.start";
    pub const PROCESSING_RULES_COMPLETE: &str = "processing.rules.complete";
    pub const PROVIDER_API_RAW_REQUEST: &str = "provider.api.raw_request";
    pub const PROVIDER_API_RAW_RESPONSE: &str = "provider.api.raw_response";

    /// `pipeline.<stage>.<action>`
    pub fn pipeline(stage: &str, action: &str) -> String {
        format!("pipeline.{stage}.{action}")
    }

    /// `execution.<strategy>.<action>`
    pub fn execution(strategy: &str, action: &str) -> String {
        format!("execution.{strategy}.{action}")
    }
}

/// True when the event name marks the end of a turn for status purposes.
pub fn is_turn_boundary(event: &str) -> bool {
    matches!(
        event,
        names::SESSION_PENDING | names::SESSION_INTERRUPTED | names::SESSION_TURN_COMPLETE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_minimal_shape() {
        let e = Event::new(names::SESSION_PENDING, "s1");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["event"], "session.pending");
        assert_eq!(json["sessionId"], "s1");
        assert!(json["eventId"].is_string());
        assert!(json.get("boundaryId").is_none());
        assert!(json.get("data").is_none());
    }

    #[test]
    fn event_builder_round_trip() {
        let e = Event::new(names::SESSION_INPUT, "s1")
            .with_data(serde_json::json!({"input": "hello"}))
            .with_trace("t1")
            .with_boundary(BoundaryType::Turn, "turn-abc", Some("session-root"))
            .with_pid(42);
        let json = serde_json::to_string(&e).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event, "session.input");
        assert_eq!(back.boundary_id.as_deref(), Some("turn-abc"));
        assert_eq!(back.parent_boundary_id.as_deref(), Some("session-root"));
        assert_eq!(back.boundary_type, Some(BoundaryType::Turn));
        assert_eq!(back.pid, Some(42));
        assert_eq!(back.data.unwrap()["input"], "hello");
    }

    #[test]
    fn turn_boundary_predicate() {
        assert!(is_turn_boundary(names::SESSION_PENDING));
        assert!(is_turn_boundary(names::SESSION_INTERRUPTED));
        assert!(is_turn_boundary(names::SESSION_TURN_COMPLETE));
        assert!(!is_turn_boundary(names::SESSION_INPUT));
        assert!(!is_turn_boundary(names::SESSION_RESPONSE));
    }

    #[test]
    fn name_helpers_compose() {
        assert_eq!(names::pipeline("signal_detection", "start"), "pipeline.signal_detection.start");
        assert_eq!(names::execution("task", "cycle_start"), "execution.task.cycle_start");
    }
}
