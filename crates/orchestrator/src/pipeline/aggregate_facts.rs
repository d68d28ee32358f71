//! Fact aggregation — dedupe signals, inject context facts.
//!
//! Signals dedupe by (dimension, name), keeping the highest confidence and
//! the first-occurrence order. The turn config is flattened into `Config`
//! facts with dotted paths; discovered tools and provider capabilities
//! join the working memory so rules can react to them.

use serde_json::Value;

use ts_domain::fact::{Fact, Provenance};

use crate::context::{CycleState, MachineContext};
use crate::interrupt::{CycleError, Interrupt};

pub async fn aggregate_facts(
    ctx: &MachineContext,
    mut state: CycleState,
) -> Result<CycleState, CycleError> {
    if ctx.cancel.is_cancelled() {
        return Err(CycleError::interrupted(Interrupt::at("pipeline.fact_aggregation")));
    }

    let signals = std::mem::take(&mut state.signals);
    state.fact_map.extend(dedupe_signals(signals));

    // Flatten the turn config into dotted-path Config facts.
    let config_value = ctx.config.to_value();
    let mut config_facts = Vec::new();
    flatten_config(&config_value, String::new(), &mut config_facts);
    state.fact_map.extend(config_facts);

    // Tool availability.
    let mut tools: Vec<String> = ctx.discovered_tools.keys().cloned().collect();
    tools.sort();
    state.fact_map.insert(Fact::ToolAvailability {
        tools,
        provenance: aggregation_provenance(),
    });

    // Provider capabilities.
    for capability in ctx.provider.capabilities() {
        state.fact_map.insert(Fact::Capability {
            name: capability.clone(),
            provenance: aggregation_provenance(),
        });
    }

    Ok(state)
}

/// Dedupe signal facts by (dimension, signal): highest confidence wins,
/// first-occurrence order is preserved.
fn dedupe_signals(signals: Vec<Fact>) -> Vec<Fact> {
    let mut deduped: Vec<Fact> = Vec::new();
    for fact in signals {
        let Fact::Signal {
            dimension, signal, confidence, ..
        } = &fact
        else {
            continue;
        };
        let existing = deduped.iter_mut().find(|candidate| {
            matches!(
                candidate,
                Fact::Signal { dimension: d, signal: s, .. } if d == dimension && s == signal
            )
        });
        match existing {
            Some(slot) => {
                if let Fact::Signal { confidence: held, .. } = slot {
                    if *confidence > *held {
                        *slot = fact;
                    }
                }
            }
            None => deduped.push(fact),
        }
    }
    deduped
}

fn aggregation_provenance() -> Option<Provenance> {
    Some(Provenance {
        source: Some("aggregation".into()),
        producer: Some("aggregateFacts".into()),
        tier: None,
    })
}

/// Keys never flattened into facts: underscore-prefixed (private) and
/// credentials.
fn excluded_key(key: &str) -> bool {
    key.starts_with('_') || key == "apiKey"
}

fn flatten_config(value: &Value, path: String, out: &mut Vec<Fact>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if excluded_key(key) {
                    continue;
                }
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                flatten_config(child, child_path, out);
            }
        }
        leaf => {
            if !path.is_empty() {
                out.push(Fact::Config {
                    path,
                    value: leaf.clone(),
                    provenance: aggregation_provenance(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_uses_dotted_paths_and_exclusions() {
        let value = serde_json::json!({
            "input": "hi",
            "apiKey": "secret",
            "_internal": {"x": 1},
            "policy": {"maxDepth": 3, "autoApproveTools": false},
        });
        let mut out = Vec::new();
        flatten_config(&value, String::new(), &mut out);

        let paths: Vec<&str> = out
            .iter()
            .filter_map(|f| match f {
                Fact::Config { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert!(paths.contains(&"input"));
        assert!(paths.contains(&"policy.maxDepth"));
        assert!(paths.contains(&"policy.autoApproveTools"));
        assert!(!paths.iter().any(|p| p.contains("apiKey")));
        assert!(!paths.iter().any(|p| p.contains("_internal")));
    }

    #[test]
    fn signal_dedupe_keeps_highest_confidence_and_order() {
        let deduped = dedupe_signals(vec![
            Fact::signal("tone", "formal", 0.5),
            Fact::signal("tone", "formal", 0.9),
            Fact::signal("tone", "formal", 0.7),
            Fact::signal("intent", "question", 0.6),
        ]);

        assert_eq!(deduped.len(), 2);
        match &deduped[0] {
            Fact::Signal { signal, confidence, .. } => {
                assert_eq!(signal, "formal");
                assert!((confidence - 0.9).abs() < f64::EPSILON);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match &deduped[1] {
            Fact::Signal { signal, .. } => assert_eq!(signal, "question"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn dedupe_is_scoped_per_dimension() {
        let deduped = dedupe_signals(vec![
            Fact::signal("tone", "direct", 0.5),
            Fact::signal("intent", "direct", 0.9),
        ]);
        assert_eq!(deduped.len(), 2, "same name in different dimensions is distinct");
    }

    #[tokio::test]
    async fn handler_injects_context_facts() {
        use ts_domain::fact::FactKind;
        use ts_domain::tool::ToolSpec;

        use crate::context::{CycleInput, CycleState};
        use crate::testing;

        let dir = tempfile::tempdir().unwrap();
        let mut tools = std::collections::HashMap::new();
        tools.insert("search".to_owned(), ToolSpec::new("search", "Search"));
        tools.insert("fetch".to_owned(), ToolSpec::new("fetch", "Fetch"));
        let ctx = testing::context_with(
            dir.path(),
            ts_module::Module::bare("test", "fixture", "0.1.0"),
            tools,
        );

        let mut state = CycleState::new(CycleInput::default());
        state.signals = vec![
            Fact::signal("tone", "formal", 0.4),
            Fact::signal("tone", "formal", 0.8),
        ];

        let state = aggregate_facts(&ctx, state).await.unwrap();

        // Signals deduped into the map.
        assert_eq!(state.fact_map.all(FactKind::Signal).len(), 1);

        // One tool-availability fact with sorted names.
        let availability = state.fact_map.all(FactKind::ToolAvailability);
        assert_eq!(availability.len(), 1);
        assert!(matches!(
            &availability[0],
            Fact::ToolAvailability { tools, .. }
                if tools == &vec!["fetch".to_owned(), "search".to_owned()]
        ));

        // Provider capabilities became facts.
        assert!(state.fact_map.has(FactKind::Capability));

        // Config flattened with dotted paths, no credentials.
        let config_paths: Vec<&str> = state
            .fact_map
            .all(FactKind::Config)
            .iter()
            .filter_map(|f| match f {
                Fact::Config { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert!(config_paths.contains(&"input"));
        assert!(!config_paths.iter().any(|p| p.contains("apiKey")));
    }
}
