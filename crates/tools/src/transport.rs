//! The transport call contract, plus an in-process implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ts_domain::error::Result;
use ts_domain::tool::ToolSpec;

/// A tool invocation as the execution plane issues it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    pub args: Value,
}

/// What a tool call produced. Failures are values, not errors: transport
/// errors become `success = false` with a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Render the outcome as text for the conversation thread.
    pub fn as_text(&self) -> String {
        if self.success {
            match &self.result {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            }
        } else {
            format!("Tool error: {}", self.error.as_deref().unwrap_or("unknown"))
        }
    }
}

/// Lifecycle and call contract for the external tool transport.
#[async_trait::async_trait]
pub trait ToolTransport: Send + Sync {
    /// Start the configured servers with the given working directory.
    async fn start_servers(&self, cwd: &Path) -> Result<()>;

    /// Stop every server. Called in a finally position by the scheduler.
    async fn stop_all_servers(&self) -> Result<()>;

    /// Enumerate tools across all servers.
    async fn discover_tools(&self) -> Result<HashMap<String, ToolSpec>>;

    /// Invoke one tool.
    async fn call_tool(&self, call: &ToolCallRequest) -> Result<ToolOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-process transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type ToolHandler = Arc<dyn Fn(&Value) -> ToolOutcome + Send + Sync>;

/// An in-process transport backed by registered closures. Serves embedded
/// tools and test fixtures without any server processes.
#[derive(Default)]
pub struct StaticTransport {
    tools: RwLock<HashMap<String, (ToolSpec, ToolHandler)>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        spec: ToolSpec,
        handler: impl Fn(&Value) -> ToolOutcome + Send + Sync + 'static,
    ) {
        self.tools
            .write()
            .insert(spec.name.clone(), (spec, Arc::new(handler)));
    }
}

#[async_trait::async_trait]
impl ToolTransport for StaticTransport {
    async fn start_servers(&self, _cwd: &Path) -> Result<()> {
        Ok(())
    }

    async fn stop_all_servers(&self) -> Result<()> {
        Ok(())
    }

    async fn discover_tools(&self) -> Result<HashMap<String, ToolSpec>> {
        Ok(self
            .tools
            .read()
            .iter()
            .map(|(name, (spec, _))| (name.clone(), spec.clone()))
            .collect())
    }

    async fn call_tool(&self, call: &ToolCallRequest) -> Result<ToolOutcome> {
        let handler = self.tools.read().get(&call.tool).map(|(_, h)| h.clone());
        Ok(match handler {
            Some(handler) => handler(&call.args),
            None => ToolOutcome::failed(format!("unknown tool: {}", call.tool)),
        })
    }
}
