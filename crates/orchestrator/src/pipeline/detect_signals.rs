//! Signal detection — run every classifier over the thread, in parallel.
//!
//! Each classifier owns one dimension. Hits below the dimension's gate are
//! dropped; a disabled dimension never runs. A hung classifier is cut off
//! by the stage's hard timeout rather than stalling the turn.

use std::time::Duration;

use futures_util::future::join_all;

use ts_domain::event::names;
use ts_domain::fact::{Fact, Provenance};

use crate::context::{CycleState, MachineContext};
use crate::interrupt::{CycleError, Interrupt};

/// Hard ceiling on the classifier fan-out.
const DETECT_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn detect_signals(
    ctx: &MachineContext,
    mut state: CycleState,
) -> Result<CycleState, CycleError> {
    if ctx.cancel.is_cancelled() {
        return Err(CycleError::interrupted(Interrupt::at("pipeline.signal_detection")));
    }

    let thread = state.input.thread.clone();
    let mut futures = Vec::new();
    for (dimension, classifier) in &ctx.module.classifiers {
        let gate = ctx.policy.gate_for(dimension);
        if !gate.enabled {
            continue;
        }
        let classifier = classifier.clone();
        let dimension = dimension.clone();
        let thread = thread.clone();
        futures.push(async move {
            ctx.emitter.emit_data(
                names::PROCESSING_CLASSIFIER_START,
                serde_json::json!({"dimension": dimension}),
            );
            let hits = classifier.classify(&thread).await;
            (dimension, gate, hits)
        });
    }

    let results = match tokio::time::timeout(DETECT_TIMEOUT, join_all(futures)).await {
        Ok(results) => results,
        Err(_) => {
            tracing::warn!("signal detection timed out, continuing with no signals");
            Vec::new()
        }
    };

    for (dimension, gate, hits) in results {
        let hits = match hits {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(dimension = %dimension, error = %e, "classifier failed");
                continue;
            }
        };
        let mut kept = 0usize;
        for hit in hits {
            if hit.confidence < gate.min_confidence {
                continue;
            }
            kept += 1;
            state.signals.push(Fact::Signal {
                dimension: dimension.clone(),
                signal: hit.signal,
                confidence: hit.confidence,
                data: hit.data,
                provenance: Some(Provenance {
                    source: Some("classifier".into()),
                    producer: Some(dimension.clone()),
                    tier: None,
                }),
            });
        }
        ctx.emitter.emit_data(
            names::PROCESSING_CLASSIFIER_COMPLETE,
            serde_json::json!({"dimension": dimension, "signals": kept}),
        );
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ts_domain::policy::SignalGate;
    use ts_domain::thread::Thread;
    use ts_module::{Classifier, Module, SignalHit};

    use crate::context::{CycleInput, CycleState};
    use crate::testing;

    struct FixedClassifier(Vec<SignalHit>);

    #[async_trait::async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _thread: &Thread) -> ts_domain::error::Result<Vec<SignalHit>> {
            Ok(self.0.clone())
        }
    }

    struct FailingClassifier;

    #[async_trait::async_trait]
    impl Classifier for FailingClassifier {
        async fn classify(&self, _thread: &Thread) -> ts_domain::error::Result<Vec<SignalHit>> {
            Err(ts_domain::error::Error::Other("classifier down".into()))
        }
    }

    fn module_with_classifiers() -> Module {
        let mut module = Module::bare("test", "fixture", "0.1.0");
        module.classifiers.insert(
            "tone".into(),
            Arc::new(FixedClassifier(vec![
                SignalHit::new("formal", 0.9),
                SignalHit::new("hesitant", 0.3),
            ])),
        );
        module
            .classifiers
            .insert("intent".into(), Arc::new(FailingClassifier));
        module
    }

    fn signal_names(state: &CycleState) -> Vec<(String, String)> {
        state
            .signals
            .iter()
            .filter_map(|f| match f {
                Fact::Signal { dimension, signal, .. } => {
                    Some((dimension.clone(), signal.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn gate_drops_low_confidence_hits() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = testing::context_with(dir.path(), module_with_classifiers(), Default::default());
        ctx.policy.default_gate = SignalGate {
            enabled: true,
            min_confidence: 0.6,
        };

        let state = detect_signals(&ctx, CycleState::new(CycleInput::default()))
            .await
            .unwrap();
        let names = signal_names(&state);
        assert_eq!(names, vec![("tone".to_owned(), "formal".to_owned())]);
    }

    #[tokio::test]
    async fn disabled_dimension_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = testing::context_with(dir.path(), module_with_classifiers(), Default::default());
        ctx.policy.signal_gates.insert(
            "tone".into(),
            SignalGate {
                enabled: false,
                min_confidence: 0.0,
            },
        );

        let state = detect_signals(&ctx, CycleState::new(CycleInput::default()))
            .await
            .unwrap();
        assert!(signal_names(&state).is_empty());
    }

    #[tokio::test]
    async fn failing_classifier_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context_with(dir.path(), module_with_classifiers(), Default::default());

        let state = detect_signals(&ctx, CycleState::new(CycleInput::default()))
            .await
            .unwrap();
        // The tone hits survive the intent classifier's failure.
        assert_eq!(state.signals.len(), 2);
    }

    #[tokio::test]
    async fn signals_carry_classifier_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context_with(dir.path(), module_with_classifiers(), Default::default());

        let state = detect_signals(&ctx, CycleState::new(CycleInput::default()))
            .await
            .unwrap();
        let provenance = state.signals[0].provenance().unwrap();
        assert_eq!(provenance.source.as_deref(), Some("classifier"));
        assert_eq!(provenance.producer.as_deref(), Some("tone"));
    }
}
