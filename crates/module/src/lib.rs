//! Behavioral module contract.
//!
//! A module supplies the decision plane's raw material: role descriptors
//! with prompts, classifiers, rules, the instruction composer, and an
//! optional response formatter. The module runs in-process; it is data
//! plus callbacks, not a plugin boundary, and it is validated strictly
//! when the scheduler loads it.

pub mod validate;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use ts_domain::error::Result;
use ts_domain::fact::FactMap;
use ts_domain::instructions::{InstructionMetadata, Instructions};
use ts_domain::plan::Plan;
use ts_domain::response::BranchResult;
use ts_domain::thread::Thread;
use ts_engine::Rule;

pub use validate::{assert_valid_module, validate_module};

/// Base token allowance used when a role does not set one.
pub const DEFAULT_BASE_TOKENS: u32 = 800;

/// Temperature used when neither the role nor the plan picks one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One detected signal within a classifier's dimension.
#[derive(Debug, Clone)]
pub struct SignalHit {
    pub signal: String,
    pub confidence: f64,
    pub data: Option<Value>,
}

impl SignalHit {
    pub fn new(signal: impl Into<String>, confidence: f64) -> Self {
        Self {
            signal: signal.into(),
            confidence,
            data: None,
        }
    }
}

/// A classifier examines the thread and reports signals for its dimension.
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, thread: &Thread) -> Result<Vec<SignalHit>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles and prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct RolePrompts {
    pub system: String,
    pub primary: String,
}

/// A role the module can play.
#[derive(Debug, Clone)]
pub struct RoleDef {
    pub name: String,
    pub is_default: bool,
    pub temperature: Option<f32>,
    pub base_tokens: Option<u32>,
    pub prompts: RolePrompts,
}

impl RoleDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_default: false,
            temperature: None,
            base_tokens: None,
            prompts: RolePrompts::default(),
        }
    }

    pub fn default_role(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_prompts(mut self, system: &str, primary: &str) -> Self {
        self.prompts = RolePrompts {
            system: system.to_owned(),
            primary: primary.to_owned(),
        };
        self
    }
}

/// Context handed to dynamic prompt templates.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub role: String,
    pub cycle: Option<u32>,
    pub max_cycles: Option<u32>,
    pub data: Value,
}

/// A prompt under an adaptation key: a static string or a context function.
#[derive(Clone)]
pub enum PromptSource {
    Static(String),
    Dynamic(Arc<dyn Fn(&PromptContext) -> String + Send + Sync>),
}

impl PromptSource {
    pub fn render(&self, context: &PromptContext) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Dynamic(template) => template(context),
        }
    }
}

impl std::fmt::Debug for PromptSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(s) => f.debug_tuple("Static").field(s).finish(),
            Self::Dynamic(_) => write!(f, "Dynamic(..)"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Module
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to the composer: the selected plan and the evaluated fact map.
pub struct ComposeInput<'a> {
    pub plan: &'a Plan,
    pub fact_map: &'a FactMap,
}

/// Composes the instruction set for a selected plan.
pub type Composer = Arc<dyn Fn(&ComposeInput<'_>, &Module) -> Result<Instructions> + Send + Sync>;

/// Folds parallel branch results into one output string.
pub type ResponseFormatter = Arc<dyn Fn(&[BranchResult]) -> String + Send + Sync>;

/// The full module surface the core consumes.
#[derive(Clone)]
pub struct Module {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub roles: Vec<RoleDef>,
    /// Adaptation keys (`adapt.*`, `length.*`, `adapt.task-progress-*`, …).
    pub prompts: HashMap<String, PromptSource>,
    /// Dimension → classifier.
    pub classifiers: HashMap<String, Arc<dyn Classifier>>,
    pub rules: Vec<Rule>,
    pub composer: Option<Composer>,
    pub format_response: Option<ResponseFormatter>,
    pub tool_dependencies: Vec<String>,
    pub frames: Option<Value>,
    pub presets: Option<Value>,
}

impl Module {
    /// A bare module with one default role and no behavior. Useful as a
    /// starting point for builders and tests.
    pub fn bare(namespace: &str, name: &str, version: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            version: version.to_owned(),
            roles: vec![RoleDef::new("assistant")
                .default_role()
                .with_prompts("You are a helpful assistant.", "")],
            prompts: HashMap::new(),
            classifiers: HashMap::new(),
            rules: Vec::new(),
            composer: None,
            format_response: None,
            tool_dependencies: Vec::new(),
            frames: None,
            presets: None,
        }
    }

    pub fn id(&self) -> String {
        format!("{}/{}@{}", self.namespace, self.name, self.version)
    }

    pub fn role(&self, name: &str) -> Option<&RoleDef> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// The default role, falling back to the first defined role.
    pub fn default_role(&self) -> Option<&RoleDef> {
        self.roles
            .iter()
            .find(|r| r.is_default)
            .or_else(|| self.roles.first())
    }

    /// Sampling temperature for a role, with the module-wide fallback.
    pub fn temperature_for(&self, role: &str) -> f32 {
        self.role(role)
            .and_then(|r| r.temperature)
            .unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn base_tokens_for(&self, role: &str) -> u32 {
        self.role(role)
            .and_then(|r| r.base_tokens)
            .unwrap_or(DEFAULT_BASE_TOKENS)
    }

    /// Render the prompt under an adaptation key, if the module defines it.
    pub fn prompt(&self, key: &str, context: &PromptContext) -> Option<String> {
        self.prompts.get(key).map(|p| p.render(context))
    }

    /// Run the composer, or fall back to the default instruction set when
    /// the module has none.
    pub fn compose(&self, input: &ComposeInput<'_>) -> Result<Instructions> {
        match &self.composer {
            Some(composer) => composer(input, self),
            None => Ok(default_instructions(self, &input.plan.role)),
        }
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id())
            .field("roles", &self.roles.len())
            .field("classifiers", &self.classifiers.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// The instruction set used when composition fails validation or the module
/// supplies no composer: the role's own prompts with no adaptations.
pub fn default_instructions(module: &Module, role: &str) -> Instructions {
    let role_def = module.role(role).or_else(|| module.default_role());
    let (system, primary) = role_def
        .map(|r| (r.prompts.system.clone(), r.prompts.primary.clone()))
        .unwrap_or_default();
    let base_tokens = module.base_tokens_for(role);
    Instructions {
        system,
        primary,
        adaptations: String::new(),
        length_guidance: String::new(),
        tool_instructions: String::new(),
        max_tokens: base_tokens,
        metadata: InstructionMetadata {
            role: role.to_owned(),
            base_tokens,
            token_multiplier: 1.0,
            length_level: "standard".into(),
            adaptation_keys: Vec::new(),
            strategy: None,
            tools_available: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_role_prefers_flagged() {
        let mut module = Module::bare("test", "demo", "0.1.0");
        module.roles = vec![
            RoleDef::new("analyzer"),
            RoleDef::new("assistant").default_role(),
        ];
        assert_eq!(module.default_role().unwrap().name, "assistant");

        module.roles = vec![RoleDef::new("analyzer"), RoleDef::new("assistant")];
        assert_eq!(module.default_role().unwrap().name, "analyzer");
    }

    #[test]
    fn temperature_falls_back() {
        let mut module = Module::bare("test", "demo", "0.1.0");
        module.roles[0].temperature = Some(0.2);
        assert!((module.temperature_for("assistant") - 0.2).abs() < f32::EPSILON);
        assert!((module.temperature_for("missing") - DEFAULT_TEMPERATURE).abs() < f32::EPSILON);
    }

    #[test]
    fn prompt_renders_static_and_dynamic() {
        let mut module = Module::bare("test", "demo", "0.1.0");
        module
            .prompts
            .insert("adapt.concise".into(), PromptSource::Static("Be brief.".into()));
        module.prompts.insert(
            "adapt.task-progress-available".into(),
            PromptSource::Dynamic(Arc::new(|ctx: &PromptContext| {
                format!("Cycle {} of {}.", ctx.cycle.unwrap_or(0), ctx.max_cycles.unwrap_or(0))
            })),
        );

        let ctx = PromptContext {
            role: "assistant".into(),
            cycle: Some(2),
            max_cycles: Some(5),
            data: Value::Null,
        };
        assert_eq!(module.prompt("adapt.concise", &ctx).as_deref(), Some("Be brief."));
        assert_eq!(
            module.prompt("adapt.task-progress-available", &ctx).as_deref(),
            Some("Cycle 2 of 5.")
        );
        assert!(module.prompt("missing", &ctx).is_none());
    }

    #[test]
    fn default_instructions_use_role_prompts() {
        let module = Module::bare("test", "demo", "0.1.0");
        let instructions = default_instructions(&module, "assistant");
        assert_eq!(instructions.system, "You are a helpful assistant.");
        assert_eq!(instructions.max_tokens, DEFAULT_BASE_TOKENS);
        assert_eq!(instructions.metadata.role, "assistant");
        assert!(ts_domain::validate::validate_instructions(&instructions).valid);
    }

    #[test]
    fn compose_without_composer_falls_back() {
        let module = Module::bare("test", "demo", "0.1.0");
        let plan = Plan::direct("assistant");
        let facts = FactMap::new();
        let instructions = module
            .compose(&ComposeInput {
                plan: &plan,
                fact_map: &facts,
            })
            .unwrap();
        assert_eq!(instructions.metadata.role, "assistant");
    }
}
