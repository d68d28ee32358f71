//! Session change subscription — file-watch fan-out.
//!
//! `subscribe` watches a session's journal and emits one `change` event per
//! settled write burst. Writes are debounced behind a stability window so a
//! partially flushed append is never surfaced to readers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use ts_domain::error::{Error, Result};
use ts_journal::session_path;

/// How long a journal must stay quiet before a change is emitted.
pub const DEFAULT_STABILITY_WINDOW: Duration = Duration::from_millis(100);

/// The single event shape subscribers receive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberEvent {
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl SubscriberEvent {
    fn change(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            kind: "change".into(),
        }
    }
}

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug)]
pub struct SubscriptionToken {
    id: u64,
}

struct WatchEntry {
    // Held for its Drop: dropping the watcher releases the OS watch and
    // closes the raw channel, which ends the debounce task.
    _watcher: RecommendedWatcher,
    session_id: String,
}

/// Fan-out of journal file changes, one watcher per subscription.
pub struct SessionSubscriber {
    base: PathBuf,
    stability_window: Duration,
    entries: Arc<Mutex<HashMap<u64, WatchEntry>>>,
    next_id: AtomicU64,
}

impl SessionSubscriber {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            stability_window: DEFAULT_STABILITY_WINDOW,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Shrink or widen the write-stability window (tests use a short one).
    pub fn with_stability_window(mut self, window: Duration) -> Self {
        self.stability_window = window;
        self
    }

    /// Watch a session's journal; `change` events arrive on `tx`.
    pub fn subscribe(
        &self,
        session_id: &str,
        tx: mpsc::UnboundedSender<SubscriberEvent>,
    ) -> Result<SubscriptionToken> {
        let path = session_path(&self.base, session_id)
            .ok_or_else(|| Error::Session(format!("malformed session id: {session_id}")))?;
        let dir = path
            .parent()
            .ok_or_else(|| Error::Session("journal path has no parent".into()))?
            .to_path_buf();
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<()>();
        let watched = path.clone();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            let Ok(event) = event else { return };
            if event.paths.iter().any(|p| p == &watched) {
                let _ = raw_tx.send(());
            }
        })
        .map_err(|e| Error::Other(format!("watcher: {e}")))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Other(format!("watch {}: {e}", dir.display())))?;

        tokio::spawn(debounce_loop(
            raw_rx,
            tx,
            path,
            session_id.to_owned(),
            self.stability_window,
        ));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(
            id,
            WatchEntry {
                _watcher: watcher,
                session_id: session_id.to_owned(),
            },
        );
        Ok(SubscriptionToken { id })
    }

    /// Release a subscription's watch resources.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        if let Some(entry) = self.entries.lock().remove(&token.id) {
            tracing::debug!(session_id = %entry.session_id, "unsubscribed");
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Drop for SessionSubscriber {
    fn drop(&mut self) {
        self.entries.lock().clear();
    }
}

/// Collapse raw watch events into one `change` per settled write burst.
async fn debounce_loop(
    mut raw: mpsc::UnboundedReceiver<()>,
    tx: mpsc::UnboundedSender<SubscriberEvent>,
    path: PathBuf,
    session_id: String,
    window: Duration,
) {
    while raw.recv().await.is_some() {
        // Wait for quiet: every further raw event restarts the window.
        loop {
            match tokio::time::timeout(window, raw.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => {}
            }
            // Quiet, but confirm the size is not still moving.
            if size_settled(&path, window).await {
                break;
            }
        }
        if tx.send(SubscriberEvent::change(&session_id)).is_err() {
            return;
        }
    }
}

async fn size_settled(path: &std::path::Path, window: Duration) -> bool {
    let before = std::fs::metadata(path).map(|m| m.len()).ok();
    tokio::time::sleep(window.min(Duration::from_millis(25))).await;
    let after = std::fs::metadata(path).map(|m| m.len()).ok();
    before == after
}
