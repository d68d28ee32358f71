//! The per-turn configuration document.
//!
//! Callers hand the scheduler one of these per turn. The JSON form is
//! validated by the shared config validator, which rejects unknown
//! top-level keys; `normalize` fills defaults before validation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ts_domain::error::Result;
use ts_domain::policy::Policy;
use ts_domain::validate::{assert_valid_config, validate_config, Validation};

/// Turn configuration, one per scheduled turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TurnConfig {
    /// The user utterance. Required, non-empty.
    pub input: String,
    /// Resume an existing session; absent mints a new one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Provider name, used for credential checks and journal metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Root of the session journal tree.
    pub session_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_dir: Option<PathBuf>,
    /// Working directory handed to the tool transport.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub policy: Policy,
    /// Mirror journal events into a per-trace stream.
    pub trace: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            input: String::new(),
            session_id: None,
            provider: None,
            model: None,
            api_key: None,
            session_dir: PathBuf::from("sessions"),
            trace_dir: None,
            cwd: None,
            policy: Policy::default(),
            trace: false,
        }
    }
}

impl TurnConfig {
    pub fn new(input: impl Into<String>, session_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            session_dir: session_dir.into(),
            ..Self::default()
        }
    }

    /// Trim the input and fill directory defaults.
    pub fn normalize(mut self) -> Self {
        self.input = self.input.trim().to_owned();
        if self.session_dir.as_os_str().is_empty() {
            self.session_dir = PathBuf::from("sessions");
        }
        self
    }

    /// The JSON form fed to the shared config validator.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn validate(&self) -> Validation {
        validate_config(&self.to_value())
    }

    pub fn assert_valid(&self) -> Result<()> {
        assert_valid_config(&self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_default_config_validates() {
        let config = TurnConfig::new("  hello  ", "/tmp/sessions").normalize();
        assert_eq!(config.input, "hello");
        assert!(config.validate().valid, "{:?}", config.validate().errors);
    }

    #[test]
    fn empty_input_fails_validation() {
        let config = TurnConfig::new("   ", "/tmp/sessions").normalize();
        assert!(!config.validate().valid);
    }

    #[test]
    fn cloud_provider_without_key_fails() {
        let mut config = TurnConfig::new("hi", "/tmp/sessions");
        config.provider = Some("anthropic".into());
        assert!(!config.validate().valid);

        config.api_key = Some("sk-test".into());
        assert!(config.validate().valid);
    }

    #[test]
    fn unknown_keys_rejected_on_deserialize() {
        let result: std::result::Result<TurnConfig, _> = serde_json::from_value(serde_json::json!({
            "input": "hi",
            "sessionDir": "/tmp/s",
            "mystery": true,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn json_form_omits_absent_options() {
        let config = TurnConfig::new("hi", "/tmp/sessions");
        let value = config.to_value();
        assert!(value.get("sessionId").is_none());
        assert!(value.get("apiKey").is_none());
        assert_eq!(value["input"], "hi");
    }
}
