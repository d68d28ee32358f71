//! Event emission — journal plus optional trace stream.
//!
//! The emitter pre-fills session identity, trace id, and pid on every
//! event. Emission never fails the turn: write errors are logged and
//! swallowed so observability hygiene cannot break execution.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use ts_domain::boundary::{new_boundary_id, BoundaryType};
use ts_domain::event::Event;
use ts_journal::{session_path, TraceWriter, WriterPool};

/// Emits events for one turn.
#[derive(Clone)]
pub struct EventEmitter {
    session_id: String,
    trace_id: String,
    base: PathBuf,
    pool: Arc<WriterPool>,
    trace: Option<TraceWriter>,
    pid: u32,
}

impl EventEmitter {
    pub fn new(
        session_id: &str,
        trace_id: &str,
        base: impl Into<PathBuf>,
        pool: Arc<WriterPool>,
        trace: Option<TraceWriter>,
    ) -> Self {
        Self {
            session_id: session_id.to_owned(),
            trace_id: trace_id.to_owned(),
            base: base.into(),
            pool,
            trace,
            pid: std::process::id(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Start building an event with identity fields pre-filled.
    pub fn event(&self, name: &str) -> Event {
        Event::new(name, &self.session_id)
            .with_trace(&self.trace_id)
            .with_pid(self.pid)
    }

    /// Write an event to the journal (and trace stream, when configured).
    pub fn emit(&self, event: Event) {
        match session_path(&self.base, &self.session_id) {
            Some(path) => {
                if let Err(e) = self.pool.append(&path, &event) {
                    tracing::warn!(event = %event.event, error = %e, "journal append failed");
                }
            }
            None => {
                tracing::warn!(session_id = %self.session_id, "cannot emit: malformed session id");
            }
        }
        if let Some(trace) = &self.trace {
            if let Err(e) = trace.append(&self.trace_id, &event) {
                tracing::warn!(event = %event.event, error = %e, "trace append failed");
            }
        }
    }

    /// Shorthand: emit a bare named event.
    pub fn emit_named(&self, name: &str) {
        self.emit(self.event(name));
    }

    /// Shorthand: emit a named event with data.
    pub fn emit_data(&self, name: &str, data: Value) {
        self.emit(self.event(name).with_data(data));
    }

    /// Open a boundary: emits `<name>` with a fresh boundary id and returns
    /// the id for the matching end event.
    pub fn boundary_start(
        &self,
        name: &str,
        boundary_type: BoundaryType,
        parent: Option<&str>,
        data: Option<Value>,
    ) -> String {
        let boundary_id = new_boundary_id(boundary_type);
        let mut event = self
            .event(name)
            .with_boundary(boundary_type, boundary_id.clone(), parent);
        if let Some(data) = data {
            event = event.with_data(data);
        }
        self.emit(event);
        boundary_id
    }

    /// Close a boundary opened by [`Self::boundary_start`].
    pub fn boundary_end(
        &self,
        name: &str,
        boundary_type: BoundaryType,
        boundary_id: &str,
        parent: Option<&str>,
        data: Option<Value>,
    ) {
        let mut event = self
            .event(name)
            .with_boundary(boundary_type, boundary_id, parent);
        if let Some(data) = data {
            event = event.with_data(data);
        }
        self.emit(event);
    }
}
