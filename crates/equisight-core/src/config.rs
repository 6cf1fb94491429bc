//! Provider configuration records.
//!
//! A [`ProviderConfig`] is a persisted row describing one LLM backend:
//! identity, credential, target model, endpoint, free-form advanced
//! parameters and lifetime usage counters. Rows are owned by a
//! [`ConfigStore`](crate::store::ConfigStore); this crate never mutates
//! counters outside the store's atomic increment operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A persisted provider configuration.
///
/// # Invariants (maintained by the store)
/// - `successful_requests + failed_requests == total_requests` after every
///   usage update.
/// - At most one active config has `is_default = true` at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Store-assigned identifier.
    pub id: u64,

    /// Unique provider kind tag, e.g. "openai", "deepseek", "qwen".
    /// Doubles as the factory dispatch key.
    pub provider_name: String,

    /// Human-facing name, e.g. "OpenAI GPT-4".
    pub display_name: String,

    /// API credential. Stored as plain text here because this mirrors the
    /// persistence row; the runtime wraps it before any network use.
    pub api_key: String,

    /// Target model id, e.g. "gpt-4" or "qwen-deep-research".
    pub model_name: String,

    /// Endpoint override. `None` means the adapter's built-in default.
    pub api_url: Option<String>,

    /// Free-form advanced parameters (temperature, max_tokens,
    /// enable_deep_thinking, timeout, ...).
    pub advanced: BTreeMap<String, JsonValue>,

    /// Whether this config is eligible for dispatch.
    pub is_active: bool,

    /// Whether this config is the dispatch default.
    pub is_default: bool,

    /// Lifetime attempt counter.
    pub total_requests: u64,

    /// Lifetime successful-attempt counter.
    pub successful_requests: u64,

    /// Lifetime failed-attempt counter.
    pub failed_requests: u64,

    /// When this config was last charged an attempt.
    pub last_used_at: Option<DateTime<Utc>>,

    /// Row creation time; tie-breaker for fallback provider resolution.
    pub created_at: DateTime<Utc>,
}

impl ProviderConfig {
    /// Success rate over all recorded attempts, as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }

    /// Typed lookup into the advanced-parameter map.
    pub fn advanced_bool(&self, key: &str) -> Option<bool> {
        self.advanced.get(key).and_then(JsonValue::as_bool)
    }

    /// Typed lookup into the advanced-parameter map.
    pub fn advanced_u64(&self, key: &str) -> Option<u64> {
        self.advanced.get(key).and_then(JsonValue::as_u64)
    }

    /// Typed lookup into the advanced-parameter map.
    pub fn advanced_f64(&self, key: &str) -> Option<f64> {
        self.advanced.get(key).and_then(JsonValue::as_f64)
    }

    /// Typed lookup into the advanced-parameter map.
    pub fn advanced_str(&self, key: &str) -> Option<&str> {
        self.advanced.get(key).and_then(JsonValue::as_str)
    }
}

/// Fields for creating a new provider configuration.
///
/// Counters always start at zero and `last_used_at` at `None`; the store
/// assigns `id` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProviderConfig {
    pub provider_name: String,
    pub display_name: String,
    pub api_key: String,
    pub model_name: String,
    pub api_url: Option<String>,
    #[serde(default)]
    pub advanced: BTreeMap<String, JsonValue>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with(advanced: BTreeMap<String, JsonValue>) -> ProviderConfig {
        ProviderConfig {
            id: 1,
            provider_name: "openai".into(),
            display_name: "OpenAI".into(),
            api_key: "sk-test".into(),
            model_name: "gpt-4".into(),
            api_url: None,
            advanced,
            is_active: true,
            is_default: false,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_success_rate() {
        let mut config = config_with(BTreeMap::new());
        assert_eq!(config.success_rate(), 0.0);

        config.total_requests = 4;
        config.successful_requests = 3;
        config.failed_requests = 1;
        assert!((config.success_rate() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_advanced_lookups() {
        let mut advanced = BTreeMap::new();
        advanced.insert("enable_deep_thinking".to_string(), json!(true));
        advanced.insert("max_tokens".to_string(), json!(15000));
        advanced.insert("temperature".to_string(), json!(0.7));
        advanced.insert("timeout".to_string(), json!("90s"));

        let config = config_with(advanced);
        assert_eq!(config.advanced_bool("enable_deep_thinking"), Some(true));
        assert_eq!(config.advanced_u64("max_tokens"), Some(15000));
        assert_eq!(config.advanced_f64("temperature"), Some(0.7));
        assert_eq!(config.advanced_str("timeout"), Some("90s"));
        assert_eq!(config.advanced_bool("missing"), None);
    }
}
