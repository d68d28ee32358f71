//! Tool transport contract and discovery.
//!
//! The transport hosts remote tool servers; the core only sees the call
//! contract: lifecycle, discovery, invocation. Discovery applies the user's
//! allow-list, and modules declare tool dependencies that must all resolve
//! before a turn starts.

pub mod discovery;
pub mod transport;

pub use discovery::{discover_and_filter, validate_tool_dependencies};
pub use transport::{StaticTransport, ToolCallRequest, ToolOutcome, ToolTransport};
