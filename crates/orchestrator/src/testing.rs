//! In-crate test fixtures: a throwaway machine context over a temp
//! directory, an echo provider, and an empty transport.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ts_domain::error::Result;
use ts_domain::policy::Policy;
use ts_domain::response::{Response, Usage};
use ts_domain::tool::ToolSpec;
use ts_journal::WriterPool;
use ts_module::Module;
use ts_providers::{ApiFlavor, LlmProvider, ProviderRequest};
use ts_tools::StaticTransport;

use crate::approval::ApprovalArbiter;
use crate::config::TurnConfig;
use crate::context::MachineContext;
use crate::emit::EventEmitter;
use crate::interrupt::CancelToken;
use crate::machine::MachineDefinition;

pub(crate) const TEST_SESSION: &str = "20250101T000000000Z-fixtures";

/// Echoes the last user message (or a fixed reply) with small usage.
pub(crate) struct EchoProvider {
    capabilities: Vec<String>,
}

impl EchoProvider {
    pub(crate) fn new() -> Self {
        Self {
            capabilities: vec!["tool_use".into(), "json_output".into()],
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for EchoProvider {
    async fn chat(&self, request: ProviderRequest) -> Result<Response> {
        let text = request
            .thread
            .iter()
            .rev()
            .find_map(|m| m.text())
            .unwrap_or("echo");
        Ok(Response::text(format!("echo: {text}"), "echo", Usage::new(8, 4)))
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn api_flavor(&self) -> ApiFlavor {
        ApiFlavor::Responses
    }

    fn provider_id(&self) -> &str {
        "echo"
    }
}

/// A context over `dir` with an echo provider and no tools.
pub(crate) fn context(dir: &Path) -> MachineContext {
    context_with(dir, Module::bare("test", "fixture", "0.1.0"), HashMap::new())
}

pub(crate) fn context_with(
    dir: &Path,
    module: Module,
    discovered_tools: HashMap<String, ToolSpec>,
) -> MachineContext {
    let pool = Arc::new(WriterPool::default());
    let emitter = Arc::new(EventEmitter::new(
        TEST_SESSION,
        "trace-fixture",
        dir,
        pool,
        None,
    ));
    MachineContext {
        module: Arc::new(module),
        provider: Arc::new(EchoProvider::new()),
        transport: Arc::new(StaticTransport::new()),
        discovered_tools: Arc::new(discovered_tools),
        policy: Policy::default(),
        config: Arc::new(TurnConfig::new("fixture input", dir)),
        cancel: CancelToken::new(),
        approvals: Arc::new(ApprovalArbiter::new()),
        emitter,
        machine: Arc::new(MachineDefinition::standard()),
        depth: 0,
        parent_boundary: None,
    }
}

/// Events written for the fixture session so far.
pub(crate) fn fixture_events(dir: &Path) -> Vec<ts_domain::event::Event> {
    let path = ts_journal::session_path(dir, TEST_SESSION).expect("fixture session path");
    ts_journal::JournalFile::new(path)
        .read_events()
        .expect("read fixture events")
}
