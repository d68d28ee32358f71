//! Journal file primitives — append and tolerant reads.
//!
//! All readers normalize line breaks (`\r\n` and lone `\r` collapse to one
//! break, even when split across read-buffer boundaries) and preserve empty
//! lines. The first/second/last probe reads a bounded number of buffers
//! regardless of file size.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use ts_domain::error::{Error, Result};
use ts_domain::event::Event;

/// Read-buffer size for probes and scans.
const CHUNK: usize = 8 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Line scanning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Incremental splitter that normalizes `\r\n` / `\r` / `\n` to one break,
/// including a CRLF pair split across two `feed` calls.
#[derive(Default)]
struct LineScanner {
    lines: Vec<String>,
    current: Vec<u8>,
    pending_cr: bool,
}

impl LineScanner {
    fn feed(&mut self, buf: &[u8]) {
        for &b in buf {
            if self.pending_cr {
                self.pending_cr = false;
                if b == b'\n' {
                    continue;
                }
            }
            match b {
                b'\n' => self.end_line(),
                b'\r' => {
                    self.end_line();
                    self.pending_cr = true;
                }
                _ => self.current.push(b),
            }
        }
    }

    fn end_line(&mut self) {
        let bytes = std::mem::take(&mut self.current);
        self.lines.push(String::from_utf8_lossy(&bytes).into_owned());
    }

    /// Completed lines plus the trailing unterminated line, if any.
    fn finish(mut self) -> (Vec<String>, Option<String>) {
        let partial = if self.current.is_empty() {
            None
        } else {
            let bytes = std::mem::take(&mut self.current);
            Some(String::from_utf8_lossy(&bytes).into_owned())
        };
        (self.lines, partial)
    }

    fn complete_count(&self) -> usize {
        self.lines.len()
    }
}

fn lines_of(bytes: &[u8]) -> Vec<String> {
    let mut scanner = LineScanner::default();
    scanner.feed(bytes);
    let (mut lines, partial) = scanner.finish();
    if let Some(p) = partial {
        lines.push(p);
    }
    lines
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JournalFile
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File metadata snapshot.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// One session's append-only JSONL file.
#[derive(Debug, Clone)]
pub struct JournalFile {
    path: PathBuf,
}

impl JournalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event, with exactly one newline terminator.
    pub fn append(&self, event: &Event) -> Result<()> {
        self.append_json(&serde_json::to_string(event)?)
    }

    /// Append one pre-serialized JSON line.
    pub fn append_json(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(Error::Io)?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes()).map_err(Error::Io)
    }

    /// `None` when the file does not exist.
    pub fn stat(&self) -> Result<Option<FileStat>> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(FileStat {
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::from),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Every line of the file, normalized, empty lines preserved.
    /// Missing file reads as empty.
    pub fn read_all(&self) -> Result<Vec<String>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(lines_of(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Parse every line as an [`Event`], skipping malformed lines with a
    /// warning. Empty lines are skipped silently.
    pub fn read_events(&self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for (index, line) in self.read_all()?.into_iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = index,
                        error = %e,
                        "skipping malformed journal line"
                    );
                }
            }
        }
        Ok(events)
    }

    /// Parse a single line as a JSON value. `None` for empty lines; `Err`
    /// for malformed JSON (callers decide whether that is fatal).
    pub fn parse_line(line: &str) -> Result<Option<Value>> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(line)?))
    }

    /// First, second, and last lines of the file, reading a bounded number
    /// of buffers regardless of file size. Absent lines come back as `""`.
    pub fn read_first_second_last(&self) -> Result<(String, String, String)> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((String::new(), String::new(), String::new()));
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let len = file.metadata().map_err(Error::Io)?.len();
        if len == 0 {
            return Ok((String::new(), String::new(), String::new()));
        }

        // Head: scan forward until two complete lines or EOF.
        let mut scanner = LineScanner::default();
        let mut read_total = 0u64;
        let mut buf = vec![0u8; CHUNK];
        while scanner.complete_count() < 2 && read_total < len {
            let n = file.read(&mut buf).map_err(Error::Io)?;
            if n == 0 {
                break;
            }
            read_total += n as u64;
            scanner.feed(&buf[..n]);
        }
        let (head_lines, head_partial) = scanner.finish();
        let mut head: Vec<String> = head_lines;
        if head.len() < 2 && read_total >= len {
            if let Some(p) = head_partial {
                head.push(p);
            }
        }
        let first = head.first().cloned().unwrap_or_default();
        let second = head.get(1).cloned().unwrap_or_default();

        // Tail: widen a window from the end until it provably contains the
        // whole last line (a break precedes it, or the window is the file).
        let mut window = CHUNK as u64;
        let last = loop {
            let start = len.saturating_sub(window);
            file.seek(SeekFrom::Start(start)).map_err(Error::Io)?;
            let mut tail = vec![0u8; (len - start) as usize];
            file.read_exact(&mut tail).map_err(Error::Io)?;

            let mut tail_scanner = LineScanner::default();
            tail_scanner.feed(&tail);
            let (lines, partial) = tail_scanner.finish();

            if start == 0 {
                break partial.or_else(|| lines.last().cloned()).unwrap_or_default();
            }
            // With a partial tail line, one completed line in the window
            // bounds it; without one, the last completed line needs a
            // break before it, i.e. at least two completed lines.
            match (&partial, lines.len()) {
                (Some(p), n) if n >= 1 => break p.clone(),
                (None, n) if n >= 2 => break lines.last().cloned().unwrap_or_default(),
                _ => window *= 2,
            }
        };

        Ok((first, second, last))
    }

    /// Lines from `index` onward, by forward byte scan counting normalized
    /// newlines. An index at or past the line count yields an empty vec.
    pub fn read_lines_from(&self, index: usize) -> Result<Vec<String>> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        let mut scanner = LineScanner::default();
        let mut buf = vec![0u8; CHUNK];
        loop {
            let n = file.read(&mut buf).map_err(Error::Io)?;
            if n == 0 {
                break;
            }
            scanner.feed(&buf[..n]);
        }
        let (mut lines, partial) = scanner.finish();
        if let Some(p) = partial {
            lines.push(p);
        }
        if index >= lines.len() {
            return Ok(Vec::new());
        }
        Ok(lines.split_off(index))
    }
}
