//! Fallback execution — explain a failure, optionally attempt recovery.
//!
//! The static explanation always exists. For non-provider error classes an
//! intelligent recovery call may improve on it, under a strict token
//! ceiling and a short deadline; recovery failure degrades silently to the
//! static text.

use std::time::Duration;

use serde_json::json;

use ts_domain::error::ErrorKind;
use ts_domain::event::names;
use ts_domain::response::Response;
use ts_domain::thread::ThreadMessage;
use ts_providers::ProviderRequest;

use crate::context::MachineContext;
use crate::machine::FallbackRequest;

/// Output ceiling for the recovery call.
const RECOVERY_MAX_TOKENS: u32 = 200;

/// Low temperature for recovery: no creativity wanted in error handling.
const RECOVERY_TEMPERATURE: f32 = 0.3;

/// Wall-clock deadline for the whole handler's recovery attempt.
const RECOVERY_DEADLINE: Duration = Duration::from_secs(1);

/// Human-readable explanation for each error kind.
fn explain(kind: ErrorKind, message: &str) -> String {
    let lead = match kind {
        ErrorKind::Depth => "The request needed deeper nesting than the configured limit allows.",
        ErrorKind::Fanout => "The request needed more parallel branches than the configured limit allows.",
        ErrorKind::Children => "The request needed more sequential steps than the configured limit allows.",
        ErrorKind::Provider => "The language model provider reported an error.",
        ErrorKind::Timeout => "Processing ran out of time before a full answer was ready.",
        ErrorKind::Validation => "An internal consistency check failed while preparing the response.",
        ErrorKind::Tool => "A tool this request depends on failed or was not permitted.",
        ErrorKind::Interrupt => "The request was interrupted.",
        ErrorKind::Unknown => "An unexpected error occurred while processing the request.",
    };
    format!("{lead} ({}: {message})", kind.code())
}

pub async fn exec_fallback(ctx: &MachineContext, req: FallbackRequest) -> Response {
    ctx.emitter.emit_data(
        names::SYSTEM_ERROR,
        json!({"kind": req.error_kind.code(), "message": req.message}),
    );

    let static_output = explain(req.error_kind, &req.message);

    // Recovery only for non-provider classes; an interrupt never recovers.
    let recoverable = !matches!(req.error_kind, ErrorKind::Provider | ErrorKind::Interrupt);
    if recoverable && !ctx.cancel.is_cancelled() {
        let mut thread = req.thread.clone();
        thread.push(ThreadMessage::user(format!(
            "The previous attempt failed ({}). Briefly tell the user what went wrong \
             and suggest how to rephrase or retry.",
            req.error_kind.code()
        )));
        let request = ProviderRequest {
            system: "You explain processing failures to users in one or two sentences.".into(),
            thread,
            tools: Vec::new(),
            temperature: Some(RECOVERY_TEMPERATURE),
            max_tokens: RECOVERY_MAX_TOKENS,
            model: ctx.config.model.clone(),
        };

        match tokio::time::timeout(RECOVERY_DEADLINE, ctx.provider.chat(request)).await {
            Ok(Ok(recovered)) if recovered.error.is_none() && !recovered.output.is_empty() => {
                let mut response = recovered;
                response.error = Some(req.message.clone());
                response
                    .metadata
                    .insert("errorKind".into(), json!(req.error_kind.code()));
                response.metadata.insert("recovered".into(), json!(true));
                return response;
            }
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                tracing::debug!(kind = %req.error_kind, "recovery attempt degraded to static text");
            }
        }
    }

    let mut response = Response::text(static_output, ctx.provider.provider_id(), Default::default());
    response.error = Some(req.message);
    response
        .metadata
        .insert("errorKind".into(), json!(req.error_kind.code()));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::FallbackRequest;
    use crate::testing;

    #[test]
    fn explanations_carry_stable_codes() {
        for kind in [
            ErrorKind::Depth,
            ErrorKind::Fanout,
            ErrorKind::Children,
            ErrorKind::Provider,
            ErrorKind::Timeout,
            ErrorKind::Validation,
            ErrorKind::Tool,
            ErrorKind::Unknown,
        ] {
            let text = explain(kind, "detail");
            assert!(text.contains(kind.code()), "{text}");
            assert!(text.contains("detail"));
        }
    }

    #[tokio::test]
    async fn provider_errors_never_attempt_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        let response = exec_fallback(
            &ctx,
            FallbackRequest {
                error_kind: ErrorKind::Provider,
                message: "upstream 500".into(),
                thread: vec![ThreadMessage::user("hello")],
            },
        )
        .await;

        // Static text only: the echo provider was not consulted.
        assert!(response.output.contains("E_PROVIDER"));
        assert!(!response.output.starts_with("echo:"));
        assert_eq!(response.error.as_deref(), Some("upstream 500"));
        assert!(response.metadata.get("recovered").is_none());
    }

    #[tokio::test]
    async fn recoverable_kinds_use_the_recovery_call() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        let response = exec_fallback(
            &ctx,
            FallbackRequest {
                error_kind: ErrorKind::Timeout,
                message: "ran long".into(),
                thread: vec![ThreadMessage::user("hello")],
            },
        )
        .await;

        assert!(response.output.starts_with("echo:"), "{}", response.output);
        assert_eq!(response.metadata["recovered"], true);
        assert_eq!(response.metadata["errorKind"], "E_TIMEOUT");
        assert_eq!(response.error.as_deref(), Some("ran long"));
    }

    #[tokio::test]
    async fn fallback_emits_system_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testing::context(dir.path());

        exec_fallback(
            &ctx,
            FallbackRequest {
                error_kind: ErrorKind::Unknown,
                message: "???".into(),
                thread: Vec::new(),
            },
        )
        .await;

        let events = testing::fixture_events(dir.path());
        let error = events
            .iter()
            .find(|e| e.event == names::SYSTEM_ERROR)
            .expect("system.error event");
        assert_eq!(error.data.as_ref().unwrap()["kind"], "E_UNKNOWN");
    }
}
