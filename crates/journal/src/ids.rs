//! Session identity and journal file layout.
//!
//! Session ids are `YYYYMMDDThhmmssSSSZ-<8-char-urlsafe-random>`: the
//! timestamp prefix makes ids globally sortable by plain lexicographic
//! comparison, and the suffix keeps concurrent acquisitions distinct.
//! Journal files live under `<base>/YYYY/MM/DD/HH/<sessionId>.jsonl`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

/// Timestamp layout inside a session id.
const ID_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

/// Length of the timestamp prefix, `20250101T120000000Z`.
const ID_TIME_LEN: usize = 19;

/// Mint a new session id for the given instant.
pub fn new_session_id(now: DateTime<Utc>) -> String {
    let stamp = now.format(ID_TIME_FORMAT);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}", &suffix[..8])
}

/// Parse the timestamp prefix of a session id. Returns `None` when the id
/// does not match the expected layout.
pub fn parse_session_timestamp(session_id: &str) -> Option<DateTime<Utc>> {
    if session_id.len() <= ID_TIME_LEN || session_id.as_bytes().get(ID_TIME_LEN) != Some(&b'-') {
        return None;
    }
    let stamp = &session_id[..ID_TIME_LEN];
    NaiveDateTime::parse_from_str(stamp, ID_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Hour-bucketed directory for a session id, relative to `base`.
pub fn session_dir(base: &Path, session_id: &str) -> Option<PathBuf> {
    let ts = parse_session_timestamp(session_id)?;
    Some(base.join(ts.format("%Y/%m/%d/%H").to_string()))
}

/// Full journal path for a session id.
pub fn session_path(base: &Path, session_id: &str) -> Option<PathBuf> {
    session_dir(base, session_id).map(|dir| dir.join(format!("{session_id}.jsonl")))
}

/// Sidecar metadata path for a session id.
pub fn meta_path(base: &Path, session_id: &str) -> Option<PathBuf> {
    session_dir(base, session_id).map(|dir| dir.join(format!("{session_id}.meta.json")))
}
