//! Shared error type used across all ThinkSuit crates.
//!
//! Every failure is classified under a stable error kind so the fallback
//! handler can explain it and callers can branch without string matching.

/// Stable error classification. The codes are part of the public contract:
/// they appear in journal events and fallback output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Nested cycle depth exceeded the policy limit.
    Depth,
    /// Parallel fan-out exceeded the policy limit.
    Fanout,
    /// Sequential step count exceeded the policy limit.
    Children,
    /// Upstream language-model failure.
    Provider,
    /// A per-handler budget or task deadline expired.
    Timeout,
    /// Schema breach in facts, plan, config, or module output.
    Validation,
    /// Tool call failure.
    Tool,
    /// User cancellation. A sentinel, not a failure.
    Interrupt,
    /// Residual.
    Unknown,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Depth => "E_DEPTH",
            Self::Fanout => "E_FANOUT",
            Self::Children => "E_CHILDREN",
            Self::Provider => "E_PROVIDER",
            Self::Timeout => "E_TIMEOUT",
            Self::Validation => "E_VALIDATION",
            Self::Tool => "E_TOOL",
            Self::Interrupt => "E_INTERRUPT",
            Self::Unknown => "E_UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Shared error type used across all ThinkSuit crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("depth limit exceeded: {0}")]
    Depth(String),

    #[error("fanout limit exceeded: {0}")]
    Fanout(String),

    #[error("step limit exceeded: {0}")]
    Children(String),

    #[error("session: {0}")]
    Session(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error onto its stable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider { .. } => ErrorKind::Provider,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Tool { .. } => ErrorKind::Tool,
            Self::Depth(_) => ErrorKind::Depth,
            Self::Fanout(_) => ErrorKind::Fanout,
            Self::Children(_) => ErrorKind::Children,
            Self::Io(_) | Self::Json(_) | Self::Session(_) | Self::Other(_) => ErrorKind::Unknown,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
