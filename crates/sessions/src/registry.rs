//! Session registry — acquire, resume, probe, reconstruct, list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Semaphore;

use ts_domain::error::{Error, Result};
use ts_domain::event::{names, Event};
use ts_domain::thread::{Thread, ThreadMessage};
use ts_journal::{new_session_id, parse_session_timestamp, session_path, JournalFile, WriterPool};

use crate::status::{derive_status, SessionStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone)]
pub struct AcquireResult {
    pub acquired: bool,
    pub session_id: String,
    pub is_new: bool,
    pub is_forked: bool,
    pub reason: Option<String>,
}

/// The constant-size probe: first/second/last parsed events plus status.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub first: Option<Value>,
    pub second: Option<Value>,
    pub last: Option<Value>,
    pub status: SessionStatus,
}

/// One row of a session listing.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Filters for [`SessionRegistry::list_sessions`].
#[derive(Debug, Clone)]
pub struct SessionQuery {
    pub from_time: Option<DateTime<Utc>>,
    pub to_time: Option<DateTime<Utc>>,
    pub sort_order: SortOrder,
    pub limit: Option<usize>,
    /// Bound on concurrent metadata probes.
    pub concurrency: usize,
}

impl Default for SessionQuery {
    fn default() -> Self {
        Self {
            from_time: None,
            to_time: None,
            sort_order: SortOrder::Descending,
            limit: None,
            concurrency: 8,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owns the session directory tree and the shared writer pool.
#[derive(Clone)]
pub struct SessionRegistry {
    base: PathBuf,
    pool: Arc<WriterPool>,
}

impl SessionRegistry {
    pub fn new(base: impl Into<PathBuf>, pool: Arc<WriterPool>) -> Self {
        Self {
            base: base.into(),
            pool,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn pool(&self) -> &Arc<WriterPool> {
        &self.pool
    }

    /// The journal file for a session id.
    pub fn journal(&self, session_id: &str) -> Result<JournalFile> {
        let path = session_path(&self.base, session_id)
            .ok_or_else(|| Error::Session(format!("malformed session id: {session_id}")))?;
        Ok(JournalFile::new(path))
    }

    /// Append one event to a session's journal through the writer pool.
    pub fn append(&self, session_id: &str, event: &Event) -> Result<()> {
        let path = session_path(&self.base, session_id)
            .ok_or_else(|| Error::Session(format!("malformed session id: {session_id}")))?;
        self.pool.append(&path, event)
    }

    /// Acquire a session for one turn.
    ///
    /// Without an id, a fresh session is created. With an id, the derived
    /// status gates acquisition: a busy session is refused, a missing or
    /// empty one is initialized with a `session.pending` event, a ready one
    /// is resumed. The pending-append-then-status-check order makes the
    /// guard best effort within one process, not cross-process linearizable.
    pub fn acquire(&self, session_id: Option<&str>) -> Result<AcquireResult> {
        let (session_id, requested_existing) = match session_id {
            Some(id) => (id.to_owned(), true),
            None => (new_session_id(Utc::now()), false),
        };

        let status = self.status(&session_id)?;
        match status {
            SessionStatus::Busy => Ok(AcquireResult {
                acquired: false,
                session_id,
                is_new: false,
                is_forked: false,
                reason: Some("currently processing".into()),
            }),
            SessionStatus::NotFound | SessionStatus::Empty => {
                self.append(&session_id, &Event::new(names::SESSION_PENDING, &session_id))?;
                Ok(AcquireResult {
                    acquired: true,
                    session_id,
                    is_new: true,
                    is_forked: false,
                    reason: None,
                })
            }
            SessionStatus::Ready => {
                let is_forked = self.is_fork(&session_id);
                self.append(&session_id, &Event::new(names::SESSION_RESUME, &session_id))?;
                Ok(AcquireResult {
                    acquired: true,
                    session_id,
                    is_new: false,
                    is_forked,
                    reason: None,
                })
            }
            SessionStatus::Initialized | SessionStatus::Malformed => {
                // Acquired without a duplicate pending event.
                if status == SessionStatus::Malformed {
                    tracing::warn!(session_id = %session_id, "acquiring malformed session");
                }
                Ok(AcquireResult {
                    acquired: true,
                    session_id,
                    is_new: !requested_existing,
                    is_forked: false,
                    reason: None,
                })
            }
        }
    }

    /// Derived status for a session.
    pub fn status(&self, session_id: &str) -> Result<SessionStatus> {
        let journal = self.journal(session_id)?;
        let exists = journal.stat()?.is_some();
        if !exists {
            return Ok(SessionStatus::NotFound);
        }
        let (first, _, last) = journal.read_first_second_last()?;
        Ok(derive_status(true, &first, &last))
    }

    /// The one O(constant) probe: parsed first/second/last plus status.
    pub fn get_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        let journal = self.journal(session_id)?;
        let exists = journal.stat()?.is_some();
        if !exists {
            return Ok(SessionMetadata {
                first: None,
                second: None,
                last: None,
                status: SessionStatus::NotFound,
            });
        }
        let (first, second, last) = journal.read_first_second_last()?;
        let status = derive_status(true, &first, &last);
        Ok(SessionMetadata {
            first: JournalFile::parse_line(&first).ok().flatten(),
            second: JournalFile::parse_line(&second).ok().flatten(),
            last: JournalFile::parse_line(&last).ok().flatten(),
            status,
        })
    }

    /// Reconstruct the conversation thread from the journal:
    /// `session.input` → user, `session.response` → assistant, in order.
    /// Missing file reads as an empty thread.
    pub fn load_thread(&self, session_id: &str) -> Result<Thread> {
        let journal = self.journal(session_id)?;
        let mut thread = Thread::new();
        for event in journal.read_events()? {
            match event.event.as_str() {
                names::SESSION_INPUT => {
                    if let Some(text) = event
                        .data
                        .as_ref()
                        .and_then(|d| d.get("input"))
                        .and_then(Value::as_str)
                    {
                        thread.push(ThreadMessage::user(text));
                    }
                }
                names::SESSION_RESPONSE => {
                    if let Some(text) = event
                        .data
                        .as_ref()
                        .and_then(|d| d.get("response"))
                        .and_then(Value::as_str)
                    {
                        thread.push(ThreadMessage::assistant(text));
                    }
                }
                _ => {}
            }
        }
        Ok(thread)
    }

    /// Whether this session was created by a fork.
    fn is_fork(&self, session_id: &str) -> bool {
        crate::fork::read_meta(&self.base, session_id)
            .ok()
            .flatten()
            .is_some_and(|meta| meta.source.is_some())
    }

    /// List sessions overlapping a time range, walking only the hour
    /// directories the range touches. Metadata probes are bounded by
    /// `query.concurrency`.
    pub async fn list_sessions(&self, query: SessionQuery) -> Result<Vec<SessionSummary>> {
        let mut candidates = collect_session_files(&self.base, &query)?;

        candidates.sort_by(|a, b| match query.sort_order {
            SortOrder::Ascending => a.0.cmp(&b.0),
            SortOrder::Descending => b.0.cmp(&a.0),
        });
        if let Some(limit) = query.limit {
            candidates.truncate(limit);
        }

        let semaphore = Arc::new(Semaphore::new(query.concurrency.max(1)));
        let mut handles = Vec::with_capacity(candidates.len());
        for (timestamp, session_id) in candidates {
            let registry = self.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                let status = tokio::task::spawn_blocking(move || {
                    registry.status(&session_id).map(|s| (session_id, s))
                })
                .await
                .ok()?
                .ok()?;
                Some(SessionSummary {
                    session_id: status.0,
                    timestamp,
                    status: status.1,
                })
            }));
        }

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(Some(summary)) = handle.await {
                summaries.push(summary);
            }
        }
        // Join order is spawn order, which already matches the sort.
        Ok(summaries)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory walk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn collect_session_files(
    base: &Path,
    query: &SessionQuery,
) -> Result<Vec<(DateTime<Utc>, String)>> {
    let mut out = Vec::new();
    let walk_numeric = |dir: &Path| -> Vec<(u32, PathBuf)> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut dirs: Vec<(u32, PathBuf)> = entries
            .flatten()
            .filter_map(|e| {
                let name = e.file_name().into_string().ok()?;
                let num: u32 = name.parse().ok()?;
                e.path().is_dir().then_some((num, e.path()))
            })
            .collect();
        dirs.sort_by_key(|(n, _)| *n);
        dirs
    };

    for (_, year_dir) in walk_numeric(base) {
        for (_, month_dir) in walk_numeric(&year_dir) {
            for (_, day_dir) in walk_numeric(&month_dir) {
                for (_, hour_dir) in walk_numeric(&day_dir) {
                    if !hour_dir_overlaps(&hour_dir, base, query) {
                        continue;
                    }
                    let Ok(entries) = std::fs::read_dir(&hour_dir) else {
                        continue;
                    };
                    for entry in entries.flatten() {
                        let name = entry.file_name().into_string().unwrap_or_default();
                        let Some(session_id) = name.strip_suffix(".jsonl") else {
                            continue;
                        };
                        let Some(timestamp) = parse_session_timestamp(session_id) else {
                            continue;
                        };
                        if query.from_time.is_some_and(|from| timestamp < from) {
                            continue;
                        }
                        if query.to_time.is_some_and(|to| timestamp > to) {
                            continue;
                        }
                        out.push((timestamp, session_id.to_owned()));
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Whether an hour directory can contain sessions inside the query range.
fn hour_dir_overlaps(hour_dir: &Path, base: &Path, query: &SessionQuery) -> bool {
    let Ok(relative) = hour_dir.strip_prefix(base) else {
        return true;
    };
    let parts: Vec<u32> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str()?.parse().ok())
        .collect();
    let [year, month, day, hour] = parts.as_slice() else {
        return true;
    };
    let Some(start) = chrono::NaiveDate::from_ymd_opt(*year as i32, *month, *day)
        .and_then(|d| d.and_hms_opt(*hour, 0, 0))
        .map(|dt| dt.and_utc())
    else {
        return false;
    };
    let end = start + chrono::Duration::hours(1);
    if query.from_time.is_some_and(|from| end <= from) {
        return false;
    }
    if query.to_time.is_some_and(|to| start > to) {
        return false;
    }
    true
}
