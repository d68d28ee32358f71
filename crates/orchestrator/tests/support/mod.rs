//! Shared fixtures: a scripted provider, module builders, journal probes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use ts_domain::error::Result;
use ts_domain::fact::Fact;
use ts_domain::event::Event;
use ts_domain::instructions::{InstructionMetadata, Instructions};
use ts_domain::plan::Plan;
use ts_domain::response::{FinishReason, Response, ToolRequest, Usage};
use ts_engine::{Condition, Rule};
use ts_journal::{session_path, JournalFile};
use ts_module::{ComposeInput, Module};
use ts_providers::{ApiFlavor, LlmProvider, ProviderRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays a queue of canned responses and records every request.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Response>>,
    requests: Mutex<Vec<ProviderRequest>>,
    calls: AtomicU32,
    capabilities: Vec<String>,
    flavor: ApiFlavor,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Response>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            capabilities: vec!["tool_use".into()],
            flavor: ApiFlavor::Responses,
            delay: None,
        }
    }

    /// Make every call take this long (for interrupt tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_flavor(mut self, flavor: ApiFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, request: ProviderRequest) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| text_response("done", 5, 5)))
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn api_flavor(&self) -> ApiFlavor {
        self.flavor
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn text_response(output: &str, prompt: u32, completion: u32) -> Response {
    Response::text(output, "scripted", Usage::new(prompt, completion))
}

pub fn continuation_response(output: &str, completion: u32) -> Response {
    let mut response = text_response(output, 10, completion);
    response.finish_reason = FinishReason::MaxTokens;
    response
}

pub fn tool_call_response(output: &str, calls: &[(&str, &str)]) -> Response {
    let mut response = text_response(output, 10, 20);
    response.finish_reason = FinishReason::ToolUse;
    response.tool_calls = Some(
        calls
            .iter()
            .map(|(call_id, tool)| ToolRequest {
                call_id: (*call_id).to_owned(),
                tool: (*tool).to_owned(),
                args: serde_json::json!({}),
            })
            .collect(),
    );
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Module builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A module with one default role and a composer that honors role prompts.
pub fn test_module() -> Module {
    let mut module = Module::bare("test", "harness", "0.1.0");
    module.composer = Some(Arc::new(|input: &ComposeInput<'_>, module: &Module| {
        let role = &input.plan.role;
        let (system, primary) = module
            .role(role)
            .or_else(|| module.default_role())
            .map(|r| (r.prompts.system.clone(), r.prompts.primary.clone()))
            .unwrap_or_default();
        Ok(Instructions {
            system,
            primary,
            adaptations: String::new(),
            length_guidance: String::new(),
            tool_instructions: String::new(),
            max_tokens: module.base_tokens_for(role),
            metadata: InstructionMetadata {
                role: role.clone(),
                base_tokens: module.base_tokens_for(role),
                token_multiplier: 1.0,
                length_level: "standard".into(),
                adaptation_keys: Vec::new(),
                strategy: None,
                tools_available: None,
            },
        })
    }));
    module
}

/// A rule that unconditionally proposes the given plan.
pub fn plan_rule(name: &str, plan: Plan) -> Rule {
    Rule::new(
        name,
        10,
        Condition::Always,
        Arc::new(move |_, builder| {
            builder.add(Fact::ExecutionPlan {
                plan: plan.clone(),
                confidence: Some(0.9),
                policy_blocked: false,
                policy_adjusted: false,
                provenance: None,
            });
            Ok(())
        }),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Journal probes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn session_events(base: &std::path::Path, session_id: &str) -> Vec<Event> {
    JournalFile::new(session_path(base, session_id).expect("session path"))
        .read_events()
        .expect("read events")
}

pub fn count_events(events: &[Event], name: &str) -> usize {
    events.iter().filter(|e| e.event == name).count()
}
