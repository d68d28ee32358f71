//! Session forking — branch a conversation at a completed turn.
//!
//! A fork copies the source journal up to the fork point into a fresh
//! session, rewriting `sessionId` and stamping `sourceSessionId` on every
//! copied event. Fork relationships live in a sidecar `<id>.meta.json`
//! keyed by the fork event's id.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ts_domain::error::{Error, Result};
use ts_domain::event::names;
use ts_journal::{meta_path, new_session_id, session_path, JournalFile};

use crate::registry::SessionRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sidecar metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One child session created at a fork point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForkEntry {
    pub session_id: String,
    pub time: DateTime<Utc>,
    pub fork_point: usize,
}

/// Where a forked session came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForkSource {
    pub session_id: String,
    pub fork_point: usize,
    pub event_id: String,
}

/// Sidecar metadata stored next to the journal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    /// fork event id → children, sorted by time.
    #[serde(default)]
    pub forks: BTreeMap<String, Vec<ForkEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ForkSource>,
}

pub(crate) fn read_meta(base: &Path, session_id: &str) -> Result<Option<SessionMeta>> {
    let Some(path) = meta_path(base, session_id) else {
        return Ok(None);
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

fn write_meta(base: &Path, session_id: &str, meta: &SessionMeta) -> Result<()> {
    let path = meta_path(base, session_id)
        .ok_or_else(|| Error::Session(format!("malformed session id: {session_id}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Io)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(meta)?).map_err(Error::Io)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Forking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of a fork attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionRegistry {
    /// Fork `source_id` at event index `fork_point`, which must address a
    /// `session.turn.complete` event.
    pub fn fork_session(&self, source_id: &str, fork_point: usize) -> Result<ForkResult> {
        let journal = self.journal(source_id)?;
        let lines = journal.read_all()?;

        let fork_line = lines.get(fork_point).cloned().unwrap_or_default();
        let fork_event = match JournalFile::parse_line(&fork_line) {
            Ok(Some(value)) => value,
            _ => {
                return Ok(ForkResult {
                    success: false,
                    session_id: None,
                    error: Some(format!("no event at fork point {fork_point}")),
                })
            }
        };
        if fork_event.get("event").and_then(Value::as_str) != Some(names::SESSION_TURN_COMPLETE) {
            return Ok(ForkResult {
                success: false,
                session_id: None,
                error: Some("Can only fork from turn.complete events".into()),
            });
        }
        let fork_event_id = fork_event
            .get("eventId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        // Copy events verbatim, rewriting identity.
        let now = Utc::now();
        let new_id = new_session_id(now);
        let new_path = session_path(self.base(), &new_id)
            .ok_or_else(|| Error::Session("generated id failed to parse".into()))?;
        let new_journal = JournalFile::new(new_path);
        for line in lines.iter().take(fork_point + 1) {
            let Some(mut value) = JournalFile::parse_line(line).ok().flatten() else {
                continue;
            };
            if let Some(object) = value.as_object_mut() {
                object.insert("sessionId".into(), Value::String(new_id.clone()));
                object.insert("sourceSessionId".into(), Value::String(source_id.to_owned()));
            }
            new_journal.append_json(&serde_json::to_string(&value)?)?;
        }

        // Record the child on the source, sorted by time (ids sort by time).
        let mut source_meta = read_meta(self.base(), source_id)?.unwrap_or_default();
        let children = source_meta.forks.entry(fork_event_id.clone()).or_default();
        children.push(ForkEntry {
            session_id: new_id.clone(),
            time: now,
            fork_point,
        });
        children.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        write_meta(self.base(), source_id, &source_meta)?;

        // Record the parent on the child.
        let child_meta = SessionMeta {
            forks: BTreeMap::new(),
            source: Some(ForkSource {
                session_id: source_id.to_owned(),
                fork_point,
                event_id: fork_event_id,
            }),
        };
        write_meta(self.base(), &new_id, &child_meta)?;

        tracing::info!(source = %source_id, fork = %new_id, fork_point, "session forked");
        Ok(ForkResult {
            success: true,
            session_id: Some(new_id),
            error: None,
        })
    }

    /// All fork points visible from `session_id`, as zippers: at each
    /// forked event the alternatives are the parent (index 0) followed by
    /// the children in time order, each with left/right neighbors.
    pub fn get_session_forks(&self, session_id: &str) -> Result<Vec<ForkPoint>> {
        let own_meta = read_meta(self.base(), session_id)?.unwrap_or_default();

        // A fork child shares its parent's fork points.
        let (parent_id, parent_meta) = match &own_meta.source {
            Some(source) => {
                let meta = read_meta(self.base(), &source.session_id)?.unwrap_or_default();
                (source.session_id.clone(), meta)
            }
            None => (session_id.to_owned(), own_meta),
        };

        let mut points: Vec<ForkPoint> = parent_meta
            .forks
            .into_iter()
            .map(|(event_id, children)| {
                let mut ids: Vec<String> = vec![parent_id.clone()];
                let fork_point = children.first().map_or(0, |c| c.fork_point);
                ids.extend(children.into_iter().map(|c| c.session_id));
                let alternatives = ids
                    .iter()
                    .enumerate()
                    .map(|(index, id)| ForkAlternative {
                        session_id: id.clone(),
                        index,
                        left: index.checked_sub(1).map(|i| ids[i].clone()),
                        right: ids.get(index + 1).cloned(),
                    })
                    .collect();
                ForkPoint {
                    event_id,
                    fork_point,
                    alternatives,
                }
            })
            .collect();
        points.sort_by_key(|p| p.fork_point);
        Ok(points)
    }
}

/// A fork point with its alternative timelines.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkPoint {
    pub event_id: String,
    pub fork_point: usize,
    pub alternatives: Vec<ForkAlternative>,
}

/// One alternative at a fork point: the session plus its zipper neighbors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkAlternative {
    pub session_id: String,
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
}
