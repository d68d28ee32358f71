//! Strict module validation, applied when the scheduler loads a module.

use ts_domain::error::{Error, Result};
use ts_domain::validate::Validation;

use crate::Module;

/// Check the module's capability set and internal consistency.
pub fn validate_module(module: &Module) -> Validation {
    let mut errors = Vec::new();

    if module.namespace.is_empty() {
        errors.push("module.namespace: must be non-empty".into());
    }
    if module.name.is_empty() {
        errors.push("module.name: must be non-empty".into());
    }
    if module.version.is_empty() {
        errors.push("module.version: must be non-empty".into());
    }

    if module.roles.is_empty() {
        errors.push("module.roles: at least one role required".into());
    }
    let defaults = module.roles.iter().filter(|r| r.is_default).count();
    if defaults > 1 {
        errors.push(format!("module.roles: {defaults} roles flagged default, expected at most 1"));
    }
    for role in &module.roles {
        if role.name.is_empty() {
            errors.push("module.roles[].name: must be non-empty".into());
        }
        if role.base_tokens == Some(0) {
            errors.push(format!("module.roles[{}].baseTokens: must be positive", role.name));
        }
    }
    let mut seen = std::collections::HashSet::new();
    for role in &module.roles {
        if !seen.insert(role.name.as_str()) {
            errors.push(format!("module.roles: duplicate role '{}'", role.name));
        }
    }

    for dimension in module.classifiers.keys() {
        if dimension.is_empty() {
            errors.push("module.classifiers: empty dimension name".into());
        }
    }

    let mut rule_names = std::collections::HashSet::new();
    for rule in &module.rules {
        if rule.name.is_empty() {
            errors.push("module.rules[].name: must be non-empty".into());
        } else if !rule_names.insert(rule.name.as_str()) {
            errors.push(format!("module.rules: duplicate rule '{}'", rule.name));
        }
    }

    for tool in &module.tool_dependencies {
        if tool.is_empty() {
            errors.push("module.toolDependencies: empty tool name".into());
        }
    }

    Validation::from_errors(errors)
}

pub fn assert_valid_module(module: &Module) -> Result<()> {
    let validation = validate_module(module);
    if validation.valid {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "module {}: {}",
            module.id(),
            validation.errors.join("; ")
        )))
    }
}
