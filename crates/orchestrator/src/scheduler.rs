//! The scheduler — drives one turn end to end.
//!
//! Validates config, acquires the session, brackets the turn with journal
//! events, starts and stops the tool transport, runs the cycle, and maps
//! the outcome into the `session.response` / `session.turn.complete` pair.
//! Sessions always end a turn `ready`: interrupted, completed, or failed.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use ts_domain::boundary::BoundaryType;
use ts_domain::error::{Error, Result};
use ts_domain::event::names;
use ts_domain::response::Response;
use ts_domain::thread::ThreadMessage;
use ts_journal::{TraceWriter, WriterPool};
use ts_module::Module;
use ts_providers::LlmProvider;
use ts_sessions::SessionRegistry;
use ts_tools::{discover_and_filter, validate_tool_dependencies, ToolTransport};

use crate::approval::ApprovalArbiter;
use crate::config::TurnConfig;
use crate::context::{CycleInput, CycleStatus, MachineContext};
use crate::cycle::run_cycle;
use crate::emit::EventEmitter;
use crate::interrupt::CancelToken;
use crate::machine::MachineDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Interrupted,
    Failed,
}

/// What one scheduled turn ultimately produced.
#[derive(Debug)]
pub struct ExecutionResult {
    pub session_id: String,
    pub status: TurnStatus,
    pub response: Option<Response>,
    pub partial_data: Option<Value>,
    pub error: Option<String>,
}

/// Handle for interrupting a running turn. A second activation is allowed
/// (force-exit UX lives outside the core).
#[derive(Clone)]
pub struct InterruptHandle {
    cancel: CancelToken,
    reasons: Arc<Mutex<Vec<String>>>,
}

impl InterruptHandle {
    pub fn interrupt(&self, reason: &str) {
        self.reasons.lock().push(reason.to_owned());
        self.cancel.cancel();
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().clone()
    }
}

/// The scheduler's reply: either a refused acquisition or a running turn.
pub struct ScheduledTurn {
    pub session_id: String,
    pub scheduled: bool,
    pub is_new: bool,
    pub is_forked: bool,
    pub reason: Option<String>,
    pub interrupt: Option<InterruptHandle>,
    handle: Option<JoinHandle<ExecutionResult>>,
}

impl ScheduledTurn {
    fn refused(session_id: String, reason: Option<String>) -> Self {
        Self {
            session_id,
            scheduled: false,
            is_new: false,
            is_forked: false,
            reason,
            interrupt: None,
            handle: None,
        }
    }

    /// Wait for the turn to finish.
    pub async fn wait(self) -> ExecutionResult {
        let session_id = self.session_id.clone();
        match self.handle {
            Some(handle) => handle.await.unwrap_or_else(|e| ExecutionResult {
                session_id,
                status: TurnStatus::Failed,
                response: None,
                partial_data: None,
                error: Some(format!("turn task panicked: {e}")),
            }),
            None => ExecutionResult {
                session_id,
                status: TurnStatus::Failed,
                response: None,
                partial_data: None,
                error: self.reason,
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Long-lived collaborators the scheduler wires into every turn.
pub struct SchedulerDeps {
    pub module: Arc<Module>,
    pub provider: Arc<dyn LlmProvider>,
    pub transport: Arc<dyn ToolTransport>,
    pub approvals: Arc<ApprovalArbiter>,
    pub pool: Arc<WriterPool>,
}

pub struct Scheduler {
    deps: SchedulerDeps,
    machine: Arc<MachineDefinition>,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps) -> Result<Self> {
        ts_module::assert_valid_module(&deps.module)?;
        Ok(Self {
            deps,
            machine: Arc::new(MachineDefinition::standard()),
        })
    }

    pub fn approvals(&self) -> Arc<ApprovalArbiter> {
        self.deps.approvals.clone()
    }

    /// Schedule one turn. Returns immediately with an interrupt handle;
    /// await [`ScheduledTurn::wait`] for the result.
    pub async fn schedule_turn(&self, config: TurnConfig) -> Result<ScheduledTurn> {
        // 1. Normalize and validate.
        let config = config.normalize();
        config.assert_valid()?;

        // 2. Acquire the session.
        let registry = SessionRegistry::new(&config.session_dir, self.deps.pool.clone());
        let acquired = registry.acquire(config.session_id.as_deref())?;
        if !acquired.acquired {
            return Ok(ScheduledTurn::refused(acquired.session_id, acquired.reason));
        }
        let session_id = acquired.session_id.clone();

        // 3. Turn-scoped wiring.
        let trace_id = uuid::Uuid::new_v4().to_string();
        let trace_writer = config
            .trace
            .then(|| {
                let base = config
                    .trace_dir
                    .clone()
                    .unwrap_or_else(|| config.session_dir.join("traces"));
                TraceWriter::new(base, self.deps.pool.clone())
            });
        let emitter = Arc::new(EventEmitter::new(
            &session_id,
            &trace_id,
            &config.session_dir,
            self.deps.pool.clone(),
            trace_writer,
        ));

        let cancel = CancelToken::new();
        let interrupt_handle = InterruptHandle {
            cancel: cancel.clone(),
            reasons: Arc::new(Mutex::new(Vec::new())),
        };

        let turn = TurnTask {
            module: self.deps.module.clone(),
            provider: self.deps.provider.clone(),
            transport: self.deps.transport.clone(),
            approvals: self.deps.approvals.clone(),
            pool: self.deps.pool.clone(),
            machine: self.machine.clone(),
            registry,
            emitter,
            cancel: cancel.clone(),
            config: Arc::new(config),
            session_id: session_id.clone(),
        };
        let handle = tokio::spawn(turn.run());

        Ok(ScheduledTurn {
            session_id,
            scheduled: true,
            is_new: acquired.is_new,
            is_forked: acquired.is_forked,
            reason: None,
            interrupt: Some(interrupt_handle),
            handle: Some(handle),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The turn task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TurnTask {
    module: Arc<Module>,
    provider: Arc<dyn LlmProvider>,
    transport: Arc<dyn ToolTransport>,
    approvals: Arc<ApprovalArbiter>,
    pool: Arc<WriterPool>,
    machine: Arc<MachineDefinition>,
    registry: SessionRegistry,
    emitter: Arc<EventEmitter>,
    cancel: CancelToken,
    config: Arc<TurnConfig>,
    session_id: String,
}

impl TurnTask {
    async fn run(self) -> ExecutionResult {
        let turn_boundary = self.emitter.boundary_start(
            names::SESSION_TURN_START,
            BoundaryType::Turn,
            None,
            None,
        );
        self.emitter.emit_data(
            names::SESSION_INPUT,
            json!({"input": self.config.input}),
        );

        let result = self.run_inner(&turn_boundary).await;

        // Sessions always transition to ready by turn end.
        match &result {
            TurnOutcome::Completed(response) => {
                self.emitter.emit_data(
                    names::SESSION_RESPONSE,
                    json!({
                        "response": response.output,
                        "usage": response.usage,
                        "model": response.model,
                        "finishReason": response.finish_reason,
                        "success": true,
                    }),
                );
            }
            TurnOutcome::Interrupted(partial) => {
                self.emitter.emit_data(
                    names::SESSION_INTERRUPTED,
                    json!({"partialData": partial}),
                );
                self.emitter.emit_data(
                    names::SESSION_RESPONSE,
                    json!({
                        "response": "The turn was interrupted before completing.",
                        "partialData": partial,
                        "success": false,
                    }),
                );
            }
            TurnOutcome::Failed(error) => {
                self.emitter.emit_data(
                    names::SESSION_RESPONSE,
                    json!({"error": error, "success": false}),
                );
            }
        }
        self.emitter.emit(
            self.emitter
                .event(names::SESSION_TURN_COMPLETE)
                .with_boundary(BoundaryType::Turn, turn_boundary, None),
        );

        if let Err(e) = self.pool.flush_all() {
            tracing::warn!(error = %e, "journal flush at turn end failed");
        }

        match result {
            TurnOutcome::Completed(response) => ExecutionResult {
                session_id: self.session_id,
                status: TurnStatus::Completed,
                response: Some(response),
                partial_data: None,
                error: None,
            },
            TurnOutcome::Interrupted(partial) => ExecutionResult {
                session_id: self.session_id,
                status: TurnStatus::Interrupted,
                response: None,
                partial_data: Some(partial),
                error: None,
            },
            TurnOutcome::Failed(error) => ExecutionResult {
                session_id: self.session_id,
                status: TurnStatus::Failed,
                response: None,
                partial_data: None,
                error: Some(error),
            },
        }
    }

    async fn run_inner(&self, turn_boundary: &str) -> TurnOutcome {
        // Thread reconstruction includes the input just journaled.
        let thread = match self.registry.load_thread(&self.session_id) {
            Ok(thread) if !thread.is_empty() => thread,
            Ok(_) => vec![ThreadMessage::user(self.config.input.clone())],
            Err(e) => return TurnOutcome::Failed(format!("loading thread: {e}")),
        };

        // Tool transport lifecycle brackets the cycle.
        let cwd = self
            .config
            .cwd
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        if let Err(e) = self.transport.start_servers(&cwd).await {
            return TurnOutcome::Failed(format!("starting tool servers: {e}"));
        }

        let outcome = self.discover_and_cycle(turn_boundary, thread).await;

        if let Err(e) = self.transport.stop_all_servers().await {
            tracing::warn!(error = %e, "stopping tool servers failed");
        }
        outcome
    }

    async fn discover_and_cycle(
        &self,
        turn_boundary: &str,
        thread: Vec<ThreadMessage>,
    ) -> TurnOutcome {
        let discovered = match discover_and_filter(
            self.transport.as_ref(),
            self.config.policy.allowed_tools.as_deref(),
        )
        .await
        {
            Ok(discovered) => discovered,
            Err(e) => return TurnOutcome::Failed(format!("tool discovery: {e}")),
        };

        // Missing module tool dependencies are fatal for the turn.
        let deps = validate_tool_dependencies(&self.module.tool_dependencies, &discovered);
        if !deps.valid {
            let message = Error::Validation(deps.errors.join("; ")).to_string();
            self.emitter
                .emit_data(names::SYSTEM_ERROR, json!({"error": message}));
            return TurnOutcome::Failed(message);
        }

        let ctx = MachineContext {
            module: self.module.clone(),
            provider: self.provider.clone(),
            transport: self.transport.clone(),
            discovered_tools: Arc::new(discovered),
            policy: self.config.policy.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
            approvals: self.approvals.clone(),
            emitter: self.emitter.clone(),
            machine: self.machine.clone(),
            depth: 0,
            parent_boundary: Some(turn_boundary.to_owned()),
        };

        match run_cycle(&ctx, CycleInput::for_thread(thread)).await {
            Ok(outcome) => match outcome.status {
                CycleStatus::Completed => match outcome.response {
                    Some(response) => TurnOutcome::Completed(response),
                    None => TurnOutcome::Failed("cycle produced no response".into()),
                },
                CycleStatus::Interrupted => {
                    TurnOutcome::Interrupted(
                        outcome.partial_value().unwrap_or(Value::Null),
                    )
                }
            },
            Err(crate::interrupt::CycleError::Interrupted(interrupt)) => {
                TurnOutcome::Interrupted(interrupt.to_value())
            }
            Err(crate::interrupt::CycleError::Failed(error)) => {
                TurnOutcome::Failed(error.to_string())
            }
        }
    }
}

enum TurnOutcome {
    Completed(Response),
    Interrupted(Value),
    Failed(String),
}
