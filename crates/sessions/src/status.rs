//! Session status derivation.
//!
//! Status comes from the journal's {first, second, last} probe alone, so a
//! status check stays O(1) regardless of journal size.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ts_domain::event::{is_turn_boundary, names};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotFound,
    Empty,
    Initialized,
    Busy,
    Malformed,
    Ready,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Empty => "empty",
            Self::Initialized => "initialized",
            Self::Busy => "busy",
            Self::Malformed => "malformed",
            Self::Ready => "ready",
        }
    }

    /// A session in this status can accept a new turn.
    pub fn acquirable(&self) -> bool {
        !matches!(self, Self::Busy)
    }
}

/// Apply the status rule ladder to the journal probe.
///
/// `first`/`last` are the raw first and last lines (empty string = absent);
/// `exists` is whether the journal file is present at all.
pub fn derive_status(exists: bool, first: &str, last: &str) -> SessionStatus {
    if !exists {
        return SessionStatus::NotFound;
    }
    if first.trim().is_empty() && last.trim().is_empty() {
        return SessionStatus::Empty;
    }

    let first_event = match parse_event_name(first) {
        Ok(name) => name,
        Err(()) => return SessionStatus::Malformed,
    };
    let last_event = match parse_event_name(last) {
        Ok(name) => name,
        Err(()) => return SessionStatus::Malformed,
    };

    // A single pending line is a freshly acquired session.
    if first == last && first_event == names::SESSION_PENDING {
        return SessionStatus::Initialized;
    }

    // A turn boundary at the tail means nothing is in flight.
    if is_turn_boundary(&last_event) {
        return SessionStatus::Ready;
    }

    // Anything else at the tail is a turn mid-flight.
    SessionStatus::Busy
}

fn parse_event_name(line: &str) -> Result<String, ()> {
    if line.trim().is_empty() {
        // One absent probe line (e.g. a single-line file's `second`) is not
        // malformed on its own; treat as a no-op name.
        return Ok(String::new());
    }
    let value: Value = serde_json::from_str(line).map_err(|_| ())?;
    value
        .get("event")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(event: &str) -> String {
        serde_json::json!({"event": event, "sessionId": "s1"}).to_string()
    }

    #[test]
    fn missing_file_is_not_found() {
        assert_eq!(derive_status(false, "", ""), SessionStatus::NotFound);
    }

    #[test]
    fn empty_file_is_empty() {
        assert_eq!(derive_status(true, "", ""), SessionStatus::Empty);
    }

    #[test]
    fn single_pending_is_initialized() {
        let pending = line(names::SESSION_PENDING);
        assert_eq!(derive_status(true, &pending, &pending), SessionStatus::Initialized);
    }

    #[test]
    fn completed_turn_is_ready() {
        let first = line(names::SESSION_PENDING);
        let last = line(names::SESSION_TURN_COMPLETE);
        assert_eq!(derive_status(true, &first, &last), SessionStatus::Ready);
    }

    #[test]
    fn interrupted_tail_is_ready() {
        let first = line(names::SESSION_PENDING);
        let last = line(names::SESSION_INTERRUPTED);
        assert_eq!(derive_status(true, &first, &last), SessionStatus::Ready);
    }

    #[test]
    fn pending_tail_after_history_is_ready() {
        let first = line(names::SESSION_TURN_COMPLETE);
        let last = line(names::SESSION_PENDING);
        assert_eq!(derive_status(true, &first, &last), SessionStatus::Ready);
    }

    #[test]
    fn mid_turn_tail_is_busy() {
        let first = line(names::SESSION_PENDING);
        for tail in [names::SESSION_INPUT, "pipeline.signal_detection.start", names::SESSION_RESPONSE] {
            let last = line(tail);
            assert_eq!(derive_status(true, &first, &last), SessionStatus::Busy, "{tail}");
        }
    }

    #[test]
    fn unparsable_probe_is_malformed() {
        let first = line(names::SESSION_PENDING);
        assert_eq!(derive_status(true, &first, "{broken"), SessionStatus::Malformed);
        assert_eq!(derive_status(true, "{broken", &first), SessionStatus::Malformed);
        // A JSON line without an event name is malformed too.
        assert_eq!(
            derive_status(true, &first, "{\"noevent\": true}"),
            SessionStatus::Malformed
        );
    }

    #[test]
    fn acquirable_covers_every_status() {
        assert!(SessionStatus::NotFound.acquirable());
        assert!(SessionStatus::Empty.acquirable());
        assert!(SessionStatus::Initialized.acquirable());
        assert!(SessionStatus::Ready.acquirable());
        assert!(SessionStatus::Malformed.acquirable());
        assert!(!SessionStatus::Busy.acquirable());
    }
}
