use ts_domain::error::Result;
use ts_domain::response::Response;
use ts_domain::thread::Thread;
use ts_domain::tool::ToolSpec;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic completion request.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    /// System text (already composed: system prompt plus adaptations).
    pub system: String,
    /// The conversation to send.
    pub thread: Thread,
    /// Tools the model may invoke.
    pub tools: Vec<ToolSpec>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Hard output cap for this call.
    pub max_tokens: u32,
    /// Model identifier override. `None` uses the provider default.
    pub model: Option<String>,
}

/// Which wire convention the provider follows for tool round-trips.
///
/// `Responses`-style providers exchange raw output items and expect
/// `function_call_output` items paired by `call_id`; chat-style providers
/// expect a `role:"tool"` message carrying `tool_call_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    Responses,
    Chat,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every language-model adapter must implement.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one completion request and wait for the full response.
    async fn chat(&self, request: ProviderRequest) -> Result<Response>;

    /// Capability names this provider/model combination advertises
    /// (e.g. `tool_use`, `json_output`, `vision`).
    fn capabilities(&self) -> &[String];

    /// How tool results are threaded back to this provider.
    fn api_flavor(&self) -> ApiFlavor;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
