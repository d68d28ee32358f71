//! Trace streams — sibling JSONL files keyed by trace id.
//!
//! Orthogonal to sessions: the same event shape, written under
//! `<traceBase>/<traceId>.jsonl` through the shared writer pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ts_domain::error::Result;
use ts_domain::event::Event;

use crate::pool::WriterPool;

/// Writes trace events under a base directory.
#[derive(Clone)]
pub struct TraceWriter {
    base: PathBuf,
    pool: Arc<WriterPool>,
}

impl TraceWriter {
    pub fn new(base: impl Into<PathBuf>, pool: Arc<WriterPool>) -> Self {
        Self {
            base: base.into(),
            pool,
        }
    }

    pub fn trace_path(&self, trace_id: &str) -> PathBuf {
        self.base.join(format!("{trace_id}.jsonl"))
    }

    pub fn append(&self, trace_id: &str, event: &Event) -> Result<()> {
        self.pool.append(&self.trace_path(trace_id), event)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}
