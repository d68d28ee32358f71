//! Schema validation for facts, plans, and external config.
//!
//! Validators collect every problem instead of stopping at the first; the
//! `assert_*` variants format the list into one `E_VALIDATION` error.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::fact::{Fact, FactMap};
use crate::instructions::Instructions;
use crate::plan::{Plan, Strategy};
use crate::policy::Policy;

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

fn assert_valid(what: &str, validation: Validation) -> Result<()> {
    if validation.valid {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{what}: {}",
            validation.errors.join("; ")
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Facts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Check one fact's invariants: confidence in `[0,1]`, blocked plans at
/// confidence zero.
pub fn validate_fact(fact: &Fact) -> Validation {
    let mut errors = Vec::new();

    if let Some(confidence) = fact.confidence() {
        if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
            errors.push(format!(
                "{:?}.confidence: {confidence} outside [0, 1]",
                fact.kind()
            ));
        }
    }

    if let Fact::ExecutionPlan {
        policy_blocked: true,
        confidence,
        ..
    } = fact
    {
        if confidence.unwrap_or(0.0) != 0.0 {
            errors.push("ExecutionPlan.confidence: blocked plan must carry confidence 0".into());
        }
    }

    Validation::from_errors(errors)
}

pub fn validate_facts(map: &FactMap) -> Validation {
    let mut errors = Vec::new();
    for fact in map.iter() {
        errors.extend(validate_fact(fact).errors);
    }
    Validation::from_errors(errors)
}

pub fn assert_valid_facts(map: &FactMap) -> Result<()> {
    assert_valid("facts", validate_facts(map))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plans
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn validate_plan(plan: &Plan) -> Validation {
    let mut errors = Vec::new();

    if plan.role.is_empty() {
        errors.push("plan.role: must be non-empty".into());
    }

    match plan.strategy {
        Strategy::Sequential => {
            if plan.sequence.as_ref().map_or(true, Vec::is_empty) {
                errors.push("plan.sequence: sequential plan requires at least one step".into());
            }
        }
        Strategy::Parallel => {
            if plan.roles.as_ref().map_or(true, Vec::is_empty) {
                errors.push("plan.roles: parallel plan requires at least one role".into());
            }
        }
        _ => {}
    }

    if let Some(resolution) = &plan.resolution {
        if resolution.max_cycles == Some(0) {
            errors.push("plan.resolution.maxCycles: must be positive".into());
        }
        if resolution.max_tokens == Some(0) {
            errors.push("plan.resolution.maxTokens: must be positive".into());
        }
        if resolution.timeout_ms == Some(0) {
            errors.push("plan.resolution.timeoutMs: must be positive".into());
        }
    }

    Validation::from_errors(errors)
}

pub fn assert_valid_plan(plan: &Plan) -> Result<()> {
    assert_valid("plan", validate_plan(plan))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Instructions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Strict check of a composed instruction set.
pub fn validate_instructions(instructions: &Instructions) -> Validation {
    let mut errors = Vec::new();

    if instructions.max_tokens == 0 {
        errors.push("instructions.maxTokens: must be positive".into());
    }
    if instructions.metadata.role.is_empty() {
        errors.push("instructions.metadata.role: must be non-empty".into());
    }
    if instructions.metadata.base_tokens == 0 {
        errors.push("instructions.metadata.baseTokens: must be positive".into());
    }
    if instructions.metadata.token_multiplier <= 0.0
        || instructions.metadata.token_multiplier.is_nan()
    {
        errors.push("instructions.metadata.tokenMultiplier: must be positive".into());
    }
    if instructions.metadata.length_level.is_empty() {
        errors.push("instructions.metadata.lengthLevel: must be non-empty".into());
    }

    Validation::from_errors(errors)
}

pub fn assert_valid_instructions(instructions: &Instructions) -> Result<()> {
    assert_valid("instructions", validate_instructions(instructions))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Top-level keys the turn config accepts. Anything else is rejected.
const CONFIG_KEYS: &[&str] = &[
    "input",
    "sessionId",
    "provider",
    "model",
    "apiKey",
    "sessionDir",
    "traceDir",
    "cwd",
    "policy",
    "trace",
];

/// Providers that run without credentials.
const CREDENTIAL_FREE_PROVIDERS: &[&str] = &["mock", "inprocess"];

fn expect_string(value: &Value, key: &str, errors: &mut Vec<String>) {
    if !value.is_string() {
        errors.push(format!("config.{key}: expected a string"));
    }
}

/// Validate the external turn-config document.
pub fn validate_config(config: &Value) -> Validation {
    let mut errors = Vec::new();

    let Some(object) = config.as_object() else {
        return Validation::from_errors(vec!["config: expected an object".into()]);
    };

    for key in object.keys() {
        if !CONFIG_KEYS.contains(&key.as_str()) {
            errors.push(format!("config.{key}: unknown key"));
        }
    }

    match object.get("input") {
        Some(Value::String(s)) if !s.trim().is_empty() => {}
        Some(Value::String(_)) => errors.push("config.input: must be non-empty".into()),
        Some(_) => errors.push("config.input: expected a string".into()),
        None => errors.push("config.input: required".into()),
    }

    for key in ["sessionId", "provider", "model", "apiKey", "sessionDir", "traceDir", "cwd"] {
        if let Some(value) = object.get(key) {
            expect_string(value, key, &mut errors);
        }
    }

    if let Some(trace) = object.get("trace") {
        if !trace.is_boolean() {
            errors.push("config.trace: expected a boolean".into());
        }
    }

    // Provider-specific credential presence.
    if let Some(Value::String(provider)) = object.get("provider") {
        let needs_key = !CREDENTIAL_FREE_PROVIDERS.contains(&provider.as_str());
        let has_key = matches!(object.get("apiKey"), Some(Value::String(s)) if !s.is_empty());
        if needs_key && !has_key {
            errors.push(format!("config.apiKey: required for provider '{provider}'"));
        }
    }

    if let Some(policy) = object.get("policy") {
        if let Err(e) = serde_json::from_value::<Policy>(policy.clone()) {
            errors.push(format!("config.policy: {e}"));
        }
    }

    Validation::from_errors(errors)
}

pub fn assert_valid_config(config: &Value) -> Result<()> {
    assert_valid("config", validate_config(config))
}
