//! Machine context and the blackboard that flows through one cycle.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use ts_domain::fact::{Fact, FactMap};
use ts_domain::instructions::Instructions;
use ts_domain::plan::Plan;
use ts_domain::policy::Policy;
use ts_domain::response::Response;
use ts_domain::thread::Thread;
use ts_domain::tool::ToolSpec;
use ts_engine::EngineMetrics;
use ts_module::Module;
use ts_providers::LlmProvider;
use ts_tools::ToolTransport;

use crate::approval::ApprovalArbiter;
use crate::config::TurnConfig;
use crate::emit::EventEmitter;
use crate::interrupt::{CancelToken, Interrupt};
use crate::machine::MachineDefinition;

/// Everything a handler needs, threaded through every cycle.
#[derive(Clone)]
pub struct MachineContext {
    pub module: Arc<Module>,
    pub provider: Arc<dyn LlmProvider>,
    pub transport: Arc<dyn ToolTransport>,
    pub discovered_tools: Arc<HashMap<String, ToolSpec>>,
    pub policy: Policy,
    pub config: Arc<TurnConfig>,
    pub cancel: CancelToken,
    pub approvals: Arc<ApprovalArbiter>,
    pub emitter: Arc<EventEmitter>,
    pub machine: Arc<MachineDefinition>,
    /// Nesting depth: 0 for the scheduler's cycle, +1 per nested cycle.
    pub depth: u32,
    /// Boundary id the next emitted boundary should nest under.
    pub parent_boundary: Option<String>,
}

impl MachineContext {
    /// A context for a nested cycle under the given boundary.
    pub fn child(&self, parent_boundary: &str) -> Self {
        let mut child = self.clone();
        child.depth += 1;
        child.parent_boundary = Some(parent_boundary.to_owned());
        child
    }

    /// Same depth, different enclosing boundary.
    pub fn with_parent(&self, parent_boundary: &str) -> Self {
        let mut ctx = self.clone();
        ctx.parent_boundary = Some(parent_boundary.to_owned());
        ctx
    }

    /// Tool specs for the given names, in name order, skipping unknowns.
    pub fn tool_specs(&self, names: &[String]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|name| self.discovered_tools.get(name).cloned())
            .collect()
    }
}

/// Position inside a bounded task, surfaced to prompts and composition.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext {
    pub cycle: u32,
    pub max_cycles: u32,
    pub is_task: bool,
}

/// Input to one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleInput {
    pub thread: Thread,
    /// Skip plan selection and use this plan (nested executions).
    pub forced_plan: Option<Plan>,
    pub task_context: Option<TaskContext>,
    /// The previous sequential step's output, verbatim.
    pub previous_output: Option<String>,
}

impl CycleInput {
    pub fn for_thread(thread: Thread) -> Self {
        Self {
            thread,
            ..Self::default()
        }
    }

    pub fn forced(thread: Thread, plan: Plan) -> Self {
        Self {
            thread,
            forced_plan: Some(plan),
            ..Self::default()
        }
    }
}

/// The blackboard the pipeline stages fill in.
#[derive(Default)]
pub struct CycleState {
    pub input: CycleInput,
    /// Gated signals from detection, before aggregation.
    pub signals: Vec<Fact>,
    pub fact_map: FactMap,
    pub engine_metrics: Option<EngineMetrics>,
    pub plan: Option<Plan>,
    pub instructions: Option<Instructions>,
    pub response: Option<Response>,
}

impl CycleState {
    pub fn new(input: CycleInput) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Completed,
    Interrupted,
}

/// What the cycle runner hands back.
pub struct CycleOutcome {
    pub status: CycleStatus,
    pub response: Option<Response>,
    /// The instructions the cycle composed (framing for accumulation).
    pub instructions: Option<Instructions>,
    pub partial: Option<Interrupt>,
}

impl CycleOutcome {
    pub fn completed(response: Response) -> Self {
        Self {
            status: CycleStatus::Completed,
            response: Some(response),
            instructions: None,
            partial: None,
        }
    }

    pub fn interrupted(interrupt: Interrupt) -> Self {
        Self {
            status: CycleStatus::Interrupted,
            response: None,
            instructions: None,
            partial: Some(interrupt),
        }
    }

    pub fn partial_value(&self) -> Option<Value> {
        self.partial.as_ref().map(Interrupt::to_value)
    }
}
