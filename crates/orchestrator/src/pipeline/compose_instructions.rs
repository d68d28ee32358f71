//! Instruction composition — delegate to the module, validate strictly.
//!
//! An invalid composition never aborts the turn: the default instruction
//! set for the plan's role substitutes, with the failure logged.

use ts_domain::validate::validate_instructions;
use ts_module::{default_instructions, ComposeInput};

use crate::context::{CycleState, MachineContext};
use crate::interrupt::{CycleError, Interrupt};

pub async fn compose_instructions(
    ctx: &MachineContext,
    mut state: CycleState,
) -> Result<CycleState, CycleError> {
    if ctx.cancel.is_cancelled() {
        return Err(CycleError::interrupted(Interrupt::at(
            "pipeline.instruction_composition",
        )));
    }

    let plan = state
        .plan
        .clone()
        .ok_or_else(|| ts_domain::error::Error::Validation("no plan selected".into()))?;

    let composed = ctx.module.compose(&ComposeInput {
        plan: &plan,
        fact_map: &state.fact_map,
    });

    let mut instructions = match composed {
        Ok(instructions) => {
            let validation = validate_instructions(&instructions);
            if validation.valid {
                instructions
            } else {
                tracing::error!(
                    errors = ?validation.errors,
                    role = %plan.role,
                    "composed instructions failed validation, using defaults"
                );
                default_instructions(&ctx.module, &plan.role)
            }
        }
        Err(e) => {
            tracing::error!(error = %e, role = %plan.role, "composer failed, using defaults");
            default_instructions(&ctx.module, &plan.role)
        }
    };

    // Enrichment after composition.
    instructions.metadata.strategy = Some(plan.strategy);
    let mut tools: Vec<String> = ctx.discovered_tools.keys().cloned().collect();
    tools.sort();
    instructions.metadata.tools_available = Some(tools);

    state.instructions = Some(instructions);
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ts_domain::instructions::{InstructionMetadata, Instructions};
    use ts_domain::plan::{Plan, Strategy};
    use ts_domain::tool::ToolSpec;
    use ts_module::Module;

    use crate::context::{CycleInput, CycleState};
    use crate::testing;

    fn state_with_plan(role: &str) -> CycleState {
        let mut state = CycleState::new(CycleInput::default());
        state.plan = Some(Plan::direct(role));
        state
    }

    fn broken_instructions() -> Instructions {
        Instructions {
            system: "s".into(),
            primary: String::new(),
            adaptations: String::new(),
            length_guidance: String::new(),
            tool_instructions: String::new(),
            max_tokens: 0, // invalid
            metadata: InstructionMetadata {
                role: String::new(), // invalid
                base_tokens: 100,
                token_multiplier: 1.0,
                length_level: "standard".into(),
                adaptation_keys: Vec::new(),
                strategy: None,
                tools_available: None,
            },
        }
    }

    #[tokio::test]
    async fn invalid_composition_substitutes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = Module::bare("test", "fixture", "0.1.0");
        module.composer = Some(Arc::new(|_, _| Ok(broken_instructions())));
        let ctx = testing::context_with(dir.path(), module, Default::default());

        let state = compose_instructions(&ctx, state_with_plan("assistant"))
            .await
            .unwrap();
        let instructions = state.instructions.unwrap();
        assert_eq!(instructions.system, "You are a helpful assistant.");
        assert!(instructions.max_tokens > 0);
        assert_eq!(instructions.metadata.role, "assistant");
    }

    #[tokio::test]
    async fn composer_error_substitutes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = Module::bare("test", "fixture", "0.1.0");
        module.composer = Some(Arc::new(|_, _| {
            Err(ts_domain::error::Error::Other("composer exploded".into()))
        }));
        let ctx = testing::context_with(dir.path(), module, Default::default());

        let state = compose_instructions(&ctx, state_with_plan("assistant"))
            .await
            .unwrap();
        assert!(state.instructions.is_some());
    }

    #[tokio::test]
    async fn metadata_enriched_with_strategy_and_tools() {
        let dir = tempfile::tempdir().unwrap();
        let mut tools = std::collections::HashMap::new();
        tools.insert("fetch".to_owned(), ToolSpec::new("fetch", "Fetch"));
        let ctx = testing::context_with(
            dir.path(),
            Module::bare("test", "fixture", "0.1.0"),
            tools,
        );

        let mut state = state_with_plan("assistant");
        state.plan.as_mut().unwrap().strategy = Strategy::Task;

        let state = compose_instructions(&ctx, state).await.unwrap();
        let metadata = state.instructions.unwrap().metadata;
        assert_eq!(metadata.strategy, Some(Strategy::Task));
        assert_eq!(metadata.tools_available.unwrap(), vec!["fetch".to_owned()]);
    }

    #[tokio::test]
    async fn missing_plan_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());
        let result = compose_instructions(&ctx, CycleState::new(CycleInput::default())).await;
        assert!(matches!(
            result,
            Err(CycleError::Failed(e)) if e.kind() == ts_domain::error::ErrorKind::Validation
        ));
    }
}
