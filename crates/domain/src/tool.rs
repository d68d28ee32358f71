//! Tool descriptors shared between discovery, planning, and providers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool as discovered from the transport and offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: Value,
    /// Opaque identity of the server hosting the tool.
    #[serde(default)]
    pub server: String,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object"}),
            server: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_spec_serde_round_trip() {
        let spec = ToolSpec::new("fetch_url", "Fetch a URL");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["name"], "fetch_url");
        assert_eq!(json["inputSchema"]["type"], "object");
        let back: ToolSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
