//! Chat configuration: model parameters with range validation, the model
//! availability table, and access credentials for the API proxy.

use serde::{Deserialize, Serialize};

/// Model chosen when a configured model is unknown or unavailable.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// A model the backend knows about, whether or not it can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub available: bool,
}

/// Known chat models. Unavailable entries are shown but rejected by
/// [`validate_model`].
pub const ALL_MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "gpt-4",
        available: false,
    },
    ModelInfo {
        name: "gpt-4-32k",
        available: false,
    },
    ModelInfo {
        name: "gpt-3.5-turbo",
        available: true,
    },
    ModelInfo {
        name: "gpt-3.5-turbo-0301",
        available: true,
    },
];

/// Resolve a model name to one that is known and available, falling back to
/// [`DEFAULT_MODEL`] otherwise.
pub fn validate_model(name: &str) -> &str {
    let known = ALL_MODELS.iter().any(|m| m.name == name && m.available);
    if known { name } else { DEFAULT_MODEL }
}

/// Clamp `value` into `[min, max]`, substituting `default` when the input is
/// not a usable number (NaN or infinite).
pub fn limit_number(value: f64, min: f64, max: f64, default: f64) -> f64 {
    if !value.is_finite() {
        return default;
    }
    value.clamp(min, max)
}

// ============================================================================
// Model configuration
// ============================================================================

/// Per-request model parameters. The setters keep every numeric field in
/// range; values loaded from disk are re-validated on write, not on read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub presence_penalty: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 1.0,
            max_tokens: 2000,
            presence_penalty: 0.0,
        }
    }
}

impl ModelConfig {
    pub fn set_model(&mut self, name: &str) {
        self.model = validate_model(name).to_string();
    }

    pub fn set_temperature(&mut self, value: f64) {
        self.temperature = limit_number(value, 0.0, 2.0, 1.0);
    }

    pub fn set_max_tokens(&mut self, value: f64) {
        self.max_tokens = limit_number(value, 0.0, 32000.0, 2000.0) as u32;
    }

    pub fn set_presence_penalty(&mut self, value: f64) {
        self.presence_penalty = limit_number(value, -2.0, 2.0, 0.0);
    }
}

// ============================================================================
// Chat configuration
// ============================================================================

/// Settings governing history assembly and memory compression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    /// Number of recent messages carried into each request. `-1` means all.
    #[serde(default = "default_history_message_count")]
    pub history_message_count: i64,

    /// Character length of uncompressed history that triggers summarization.
    #[serde(default = "default_compress_threshold")]
    pub compress_message_length_threshold: usize,

    #[serde(default)]
    pub model_config: ModelConfig,
}

fn default_history_message_count() -> i64 {
    4
}

fn default_compress_threshold() -> usize {
    1000
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_message_count: default_history_message_count(),
            compress_message_length_threshold: default_compress_threshold(),
            model_config: ModelConfig::default(),
        }
    }
}

// ============================================================================
// Access configuration
// ============================================================================

/// Credentials attached to every API request. Empty fields produce no header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub access_code: String,

    #[serde(default)]
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_number_clamps_and_defaults() {
        assert_eq!(limit_number(1.5, 0.0, 2.0, 1.0), 1.5);
        assert_eq!(limit_number(-0.5, 0.0, 2.0, 1.0), 0.0);
        assert_eq!(limit_number(99.0, 0.0, 2.0, 1.0), 2.0);
        assert_eq!(limit_number(f64::NAN, 0.0, 2.0, 1.0), 1.0);
        assert_eq!(limit_number(f64::INFINITY, 0.0, 2.0, 1.0), 1.0);
    }

    #[test]
    fn validate_model_falls_back() {
        assert_eq!(validate_model("gpt-3.5-turbo"), "gpt-3.5-turbo");
        assert_eq!(validate_model("gpt-3.5-turbo-0301"), "gpt-3.5-turbo-0301");
        // Known but unavailable
        assert_eq!(validate_model("gpt-4"), DEFAULT_MODEL);
        // Unknown
        assert_eq!(validate_model("llama-70b"), DEFAULT_MODEL);
    }

    #[test]
    fn model_config_setters_validate() {
        let mut config = ModelConfig::default();

        config.set_temperature(3.5);
        assert_eq!(config.temperature, 2.0);

        config.set_max_tokens(1e9);
        assert_eq!(config.max_tokens, 32000);

        config.set_presence_penalty(f64::NAN);
        assert_eq!(config.presence_penalty, 0.0);

        config.set_model("gpt-4");
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn chat_config_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.history_message_count, 4);
        assert_eq!(config.compress_message_length_threshold, 1000);
        assert_eq!(config.model_config.model, DEFAULT_MODEL);
    }

    #[test]
    fn chat_config_deserializes_with_missing_fields() {
        let config: ChatConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ChatConfig::default());
    }
}
