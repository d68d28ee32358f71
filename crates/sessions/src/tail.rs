//! Incremental journal tailing.
//!
//! A `SessionTail` remembers how far into a journal it has read and hands
//! back only the events appended since. Pairs with the subscriber: on each
//! `change` notification, drain the tail.

use std::path::PathBuf;

use ts_domain::error::Result;
use ts_domain::event::Event;
use ts_journal::{session_path, JournalFile};

/// Cursor over one session's journal.
pub struct SessionTail {
    journal: JournalFile,
    next_line: usize,
}

impl SessionTail {
    /// Start tailing from the beginning of the journal.
    pub fn new(base: impl Into<PathBuf>, session_id: &str) -> Result<Self> {
        let path = session_path(&base.into(), session_id).ok_or_else(|| {
            ts_domain::error::Error::Session(format!("malformed session id: {session_id}"))
        })?;
        Ok(Self {
            journal: JournalFile::new(path),
            next_line: 0,
        })
    }

    /// Skip everything currently in the journal; only future appends will
    /// be returned.
    pub fn from_end(mut self) -> Result<Self> {
        self.next_line = self.journal.read_all()?.len();
        Ok(self)
    }

    /// Events appended since the last poll. Malformed lines advance the
    /// cursor but are skipped with a warning.
    pub fn poll(&mut self) -> Result<Vec<Event>> {
        let lines = self.journal.read_lines_from(self.next_line)?;
        let mut events = Vec::with_capacity(lines.len());
        for line in &lines {
            self.next_line += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        line = self.next_line - 1,
                        error = %e,
                        "skipping malformed journal line while tailing"
                    );
                }
            }
        }
        Ok(events)
    }

    /// The line index the next poll will start from.
    pub fn position(&self) -> usize {
        self.next_line
    }
}
