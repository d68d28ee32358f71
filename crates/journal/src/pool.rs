//! Lazy per-session append streams with LRU eviction.
//!
//! One open handle per journal file, created on first write. The pool is
//! bounded: when full, the least-recently-used handle is flushed and
//! closed. `flush_all` exists for shutdown paths that must not lose events.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use ts_domain::error::{Error, Result};
use ts_domain::event::Event;

/// Default maximum number of simultaneously open journal handles.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

struct OpenWriter {
    file: File,
    last_used: u64,
}

struct PoolInner {
    writers: HashMap<PathBuf, OpenWriter>,
    clock: u64,
}

/// Pool of append handles keyed by file path.
pub struct WriterPool {
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl WriterPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(PoolInner {
                writers: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// Serialize `event` and append it to `path`, one newline terminator.
    /// Appends to the same path are serialized by the pool lock.
    pub fn append(&self, path: &Path, event: &Event) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        self.append_raw(path, line.as_bytes())
    }

    /// Append pre-serialized bytes (caller supplies the terminator).
    pub fn append_raw(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let now = inner.clock;

        if !inner.writers.contains_key(path) {
            if inner.writers.len() >= self.capacity {
                evict_lru(&mut inner);
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(Error::Io)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(Error::Io)?;
            inner
                .writers
                .insert(path.to_path_buf(), OpenWriter { file, last_used: now });
        }

        let writer = inner.writers.get_mut(path).expect("writer just ensured");
        writer.last_used = now;
        writer.file.write_all(bytes).map_err(Error::Io)
    }

    /// Number of currently open handles.
    pub fn open_count(&self) -> usize {
        self.inner.lock().writers.len()
    }

    /// Flush and close the handle for one path, if open.
    pub fn close(&self, path: &Path) {
        let mut inner = self.inner.lock();
        if let Some(mut writer) = inner.writers.remove(path) {
            let _ = writer.file.flush();
        }
    }

    /// Flush every open handle. Handles stay open.
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        for (path, writer) in inner.writers.iter_mut() {
            writer.file.flush().map_err(|e| {
                Error::Other(format!("flushing {}: {e}", path.display()))
            })?;
            writer.file.sync_data().map_err(|e| {
                Error::Other(format!("syncing {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    /// Flush and close every handle.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        for (_, mut writer) in inner.writers.drain() {
            let _ = writer.file.flush();
            let _ = writer.file.sync_data();
        }
    }
}

impl Default for WriterPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

fn evict_lru(inner: &mut PoolInner) {
    let Some(path) = inner
        .writers
        .iter()
        .min_by_key(|(_, w)| w.last_used)
        .map(|(p, _)| p.clone())
    else {
        return;
    };
    if let Some(mut writer) = inner.writers.remove(&path) {
        let _ = writer.file.flush();
        tracing::debug!(path = %path.display(), "evicted journal writer");
    }
}
