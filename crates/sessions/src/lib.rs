//! Session layer — registry, fork semantics, and change subscription.
//!
//! A session is the persistent, append-only record of a conversation plus
//! sidecar metadata. The registry acquires and resumes sessions, derives
//! status from a constant-size probe, reconstructs threads, lists sessions
//! by time range, and forks completed turns into new sessions.

pub mod fork;
pub mod registry;
pub mod status;
pub mod subscriber;
pub mod tail;

pub use fork::{ForkAlternative, ForkEntry, ForkPoint, ForkResult, ForkSource, SessionMeta};
pub use registry::{
    AcquireResult, SessionMetadata, SessionQuery, SessionRegistry, SessionSummary, SortOrder,
};
pub use status::SessionStatus;
pub use subscriber::{SessionSubscriber, SubscriberEvent, SubscriptionToken};
pub use tail::SessionTail;
