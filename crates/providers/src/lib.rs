//! Provider trait — the language-model call contract.
//!
//! Concrete adapters (HTTP wire formats, auth, streaming) live outside the
//! core; the core only needs one call shape, a capability probe, and the
//! API flavor that decides how tool results are threaded back.

pub mod traits;

pub use traits::{ApiFlavor, LlmProvider, ProviderRequest};
