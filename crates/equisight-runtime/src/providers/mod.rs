//! LLM provider adapters for EquiSight.
//!
//! Each adapter speaks one backend family's wire protocol but implements
//! the same [`Provider`] contract: `generate_analysis` always returns an
//! [`AnalysisResult`] — runtime faults (network, auth, malformed responses)
//! are classified into the result, never raised past the adapter boundary.
//! Only construction-time configuration defects surface as [`ConfigError`].
//!
//! ## Security
//!
//! All adapters hold their key as an [`ApiCredential`]; see [`secrets`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use equisight_core::{AnalysisContext, AnalysisResult, ProviderConfig};

mod chat;
mod deep_research;
mod factory;
mod openai;
mod reasoner;
pub mod secrets;

pub use deep_research::{DeepResearchFactory, DeepResearchProvider, StreamAssembler, StreamChunk};
pub use factory::{ProviderFactory, ProviderRegistry};
pub use openai::{OpenAiFactory, OpenAiProvider};
pub use reasoner::{ReasonerFactory, ReasonerProvider};
pub use secrets::{ApiCredential, CredentialSource};

/// Provider kind tags. These double as `provider_name` values in stored
/// configurations and as factory dispatch keys.
pub const KIND_OPENAI: &str = "openai";
pub const KIND_REASONER: &str = "deepseek";
pub const KIND_DEEP_RESEARCH: &str = "qwen";

/// Configuration defects detected at provider construction time.
///
/// These are raised (not folded into an [`AnalysisResult`]) because they
/// indicate a deployment mistake the operator must fix, not a transient
/// fault to report to an end user.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing API credential for provider '{kind}'")]
    MissingCredential { kind: String },

    #[error("missing model id for provider '{kind}'")]
    MissingModel { kind: String },

    #[error("unknown provider kind '{kind}', available: {available:?}")]
    UnknownKind { kind: String, available: Vec<String> },

    #[error("invalid advanced parameter '{key}': {message}")]
    InvalidParameter { key: String, message: String },
}

/// Settings shared by every adapter, extracted from a [`ProviderConfig`]
/// row at construction time.
#[derive(Debug)]
pub struct ProviderSettings {
    pub credential: ApiCredential,
    pub model: String,
    pub endpoint: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-request HTTP timeout. Distinct from the orchestrator's dispatch
    /// window, which caps the whole logical call.
    pub timeout: Duration,
    /// Reasoning adapter only: ask the model for explicit step-by-step
    /// reasoning. Changes the request instructions, not the wire protocol.
    pub enable_deep_thinking: bool,
}

impl ProviderSettings {
    /// Extract settings from a config row.
    ///
    /// Fails fast on a blank credential or model id; everything else has a
    /// default. The advanced `timeout` parameter accepts either seconds as
    /// a number or a humantime string like `"90s"`.
    pub fn from_config(config: &ProviderConfig, kind: &'static str) -> Result<Self, ConfigError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                kind: kind.to_string(),
            });
        }
        if config.model_name.trim().is_empty() {
            return Err(ConfigError::MissingModel {
                kind: kind.to_string(),
            });
        }

        let timeout = match config.advanced.get("timeout") {
            None => Duration::from_secs(60),
            Some(value) => parse_timeout(value)?,
        };

        Ok(Self {
            credential: ApiCredential::new(
                config.api_key.clone(),
                CredentialSource::Store,
                kind,
            ),
            model: config.model_name.clone(),
            endpoint: config.api_url.clone(),
            max_tokens: config.advanced_u64("max_tokens").unwrap_or(15_000) as u32,
            temperature: config.advanced_f64("temperature").unwrap_or(0.7) as f32,
            timeout,
            enable_deep_thinking: config.advanced_bool("enable_deep_thinking").unwrap_or(false),
        })
    }
}

fn parse_timeout(value: &serde_json::Value) -> Result<Duration, ConfigError> {
    if let Some(secs) = value.as_u64() {
        return Ok(Duration::from_secs(secs));
    }
    if let Some(text) = value.as_str() {
        return humantime::parse_duration(text).map_err(|e| ConfigError::InvalidParameter {
            key: "timeout".to_string(),
            message: e.to_string(),
        });
    }
    Err(ConfigError::InvalidParameter {
        key: "timeout".to_string(),
        message: "expected seconds or a duration string".to_string(),
    })
}

/// The unified adapter contract.
///
/// # Failure discipline
/// `generate_analysis` never returns `Err` — it has no `Err`. All runtime
/// faults come back as `AnalysisResult { success: false, error: Some(..) }`.
/// `test_connection` likewise answers `false` for ordinary failures.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Kind tag for registry dispatch and metrics.
    fn kind(&self) -> &'static str;

    /// Model ids this adapter family is known to work with. Advisory;
    /// an operator may configure others.
    fn supported_models(&self) -> &'static [&'static str];

    /// Minimal round-trip to verify reachability and credential validity.
    async fn test_connection(&self) -> bool;

    /// Execute the full protocol and classify the outcome.
    async fn generate_analysis(&self, prompt: &str, ctx: &AnalysisContext) -> AnalysisResult;

    /// Rough token estimate (~4 chars per token) for backends that do not
    /// report usage.
    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.len() / 4) as u32
    }
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("kind", &self.kind()).finish()
    }
}
