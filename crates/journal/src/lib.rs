//! Append-only JSONL journals.
//!
//! Each session gets a `<sessionId>.jsonl` file under an hour-bucketed
//! directory tree. Every event is appended as a single JSON line. Readers
//! are tolerant: malformed lines are skipped with a warning, CRLF is
//! normalized, and the first/second/last probe never reads the whole file.

pub mod file;
pub mod ids;
pub mod pool;
pub mod trace;

pub use file::JournalFile;
pub use ids::{meta_path, new_session_id, parse_session_timestamp, session_dir, session_path};
pub use pool::WriterPool;
pub use trace::TraceWriter;
