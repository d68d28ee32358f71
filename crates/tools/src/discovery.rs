//! Tool discovery with allow-list filtering and dependency validation.

use std::collections::HashMap;

use ts_domain::error::Result;
use ts_domain::tool::ToolSpec;
use ts_domain::validate::Validation;

use crate::transport::ToolTransport;

/// Discover tools from the transport and keep only allow-listed names.
/// `None` allows everything.
pub async fn discover_and_filter(
    transport: &dyn ToolTransport,
    allow_list: Option<&[String]>,
) -> Result<HashMap<String, ToolSpec>> {
    let mut discovered = transport.discover_tools().await?;
    let total = discovered.len();

    if let Some(allowed) = allow_list {
        discovered.retain(|name, _| allowed.iter().any(|a| a == name));
    }

    tracing::debug!(
        discovered = total,
        allowed = discovered.len(),
        "tool discovery complete"
    );
    Ok(discovered)
}

/// Check that every tool a module depends on was discovered (and survived
/// the allow-list). A failure here is fatal for the turn.
pub fn validate_tool_dependencies(
    dependencies: &[String],
    discovered: &HashMap<String, ToolSpec>,
) -> Validation {
    let missing: Vec<String> = dependencies
        .iter()
        .filter(|dep| !discovered.contains_key(*dep))
        .map(|dep| format!("missing tool dependency: {dep}"))
        .collect();
    Validation::from_errors(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{StaticTransport, ToolOutcome};
    use serde_json::Value;

    fn transport_with(names: &[&str]) -> StaticTransport {
        let transport = StaticTransport::new();
        for name in names {
            transport.register(ToolSpec::new(*name, "test tool"), |_: &Value| {
                ToolOutcome::ok(Value::Null)
            });
        }
        transport
    }

    #[tokio::test]
    async fn allow_list_filters_discovery() {
        let transport = transport_with(&["fetch", "exec", "search"]);

        let all = discover_and_filter(&transport, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let allowed = vec!["fetch".to_owned(), "search".to_owned()];
        let filtered = discover_and_filter(&transport, Some(&allowed)).await.unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(!filtered.contains_key("exec"));
    }

    #[tokio::test]
    async fn dependency_validation_reports_missing() {
        let transport = transport_with(&["fetch"]);
        let discovered = discover_and_filter(&transport, None).await.unwrap();

        let ok = validate_tool_dependencies(&["fetch".to_owned()], &discovered);
        assert!(ok.valid);

        let missing = validate_tool_dependencies(
            &["fetch".to_owned(), "search".to_owned()],
            &discovered,
        );
        assert!(!missing.valid);
        assert_eq!(missing.errors.len(), 1);
        assert!(missing.errors[0].contains("search"));
    }
}
