//! Core result and context types shared across the analysis pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure of a single analysis attempt.
///
/// Every variant renders as a stable machine-readable code so callers can
/// distinguish "try another provider" (`ApiError`, `Timeout`,
/// `StreamInterrupted`) from "fix configuration" (`NoProviderConfigured`)
/// from "protocol mismatch" (`ParseError`, `NoContentAfterToolCall`).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisFailure {
    /// Remote rejected the request with a non-2xx status.
    #[error("api_error:{status}")]
    ApiError { status: u16 },

    /// The request (or the orchestrator's dispatch window) timed out.
    #[error("timeout")]
    Timeout,

    /// The response body could not be decoded.
    #[error("parse_error")]
    ParseError,

    /// A tool-call continuation round also produced no terminal content.
    #[error("no_content_after_tool_call")]
    NoContentAfterToolCall,

    /// The streaming session broke before reporting a finished answer.
    #[error("stream_interrupted")]
    StreamInterrupted,

    /// No active provider configuration exists to dispatch against.
    #[error("no_provider_configured")]
    NoProviderConfigured,
}

/// Outcome of one logical `generate_analysis` call.
///
/// Adapters never raise for ordinary runtime faults; they return this with
/// `success = false` and a classified [`AnalysisFailure`] instead. `content`
/// is only meaningful when `success` is true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Whether the attempt produced a usable report.
    pub success: bool,

    /// The final report text (success only).
    pub content: Option<String>,

    /// Clarifying/confirmation output the deep-research backend emitted
    /// before the final answer. Optional secondary channel; most callers
    /// ignore it.
    pub clarifying: Option<String>,

    /// Model id that produced the report.
    pub model: Option<String>,

    /// Provider-reported token count, or an estimate when the backend
    /// does not report usage (streaming sessions typically don't).
    pub tokens_used: Option<u32>,

    /// Wall-clock seconds from dispatch to final content.
    pub response_time: Option<f64>,

    /// Classified failure (failure only).
    pub error: Option<AnalysisFailure>,
}

impl AnalysisResult {
    /// Build a successful result.
    pub fn ok(
        content: impl Into<String>,
        model: impl Into<String>,
        tokens_used: Option<u32>,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            clarifying: None,
            model: Some(model.into()),
            tokens_used,
            response_time: Some(elapsed.as_secs_f64()),
            error: None,
        }
    }

    /// Build a classified failure.
    pub fn failed(error: AnalysisFailure) -> Self {
        Self {
            success: false,
            content: None,
            clarifying: None,
            model: None,
            tokens_used: None,
            response_time: None,
            error: Some(error),
        }
    }

    /// Attach clarifying-stream output (deep-research adapter).
    pub fn with_clarifying(mut self, clarifying: impl Into<String>) -> Self {
        let text = clarifying.into();
        if !text.is_empty() {
            self.clarifying = Some(text);
        }
        self
    }

    /// Attach elapsed time to a result built without one.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.response_time = Some(elapsed.as_secs_f64());
        self
    }

    /// Stable error code (e.g. `api_error:503`), if this is a failure.
    pub fn error_code(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// Ephemeral stock context supplied by the caller for one analysis.
///
/// Not persisted by this crate; its fields are interpolated into the chosen
/// prompt template as `${code}`, `${name}`, `${market}`, `${industry}`,
/// `${exchange}` and `${analysis_date}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisContext {
    /// Ticker or exchange-local code, e.g. "AAPL" or "600519".
    pub code: String,

    /// Display name, e.g. "Apple Inc.".
    pub name: String,

    /// Market tag, e.g. "US" or "CN".
    pub market: String,

    /// Industry classification, if known.
    pub industry: Option<String>,

    /// Listing exchange, if known.
    pub exchange: Option<String>,

    /// Date the analysis is for.
    pub analysis_date: NaiveDate,
}

impl AnalysisContext {
    /// Template variables derived from this context.
    ///
    /// Missing optional fields map to `"unknown"` rather than being omitted,
    /// so built-in templates never leave `${industry}`/`${exchange}` behind.
    pub fn variables(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("code".to_string(), self.code.clone());
        vars.insert("name".to_string(), self.name.clone());
        vars.insert("market".to_string(), self.market.clone());
        vars.insert(
            "industry".to_string(),
            self.industry.clone().unwrap_or_else(|| "unknown".to_string()),
        );
        vars.insert(
            "exchange".to_string(),
            self.exchange.clone().unwrap_or_else(|| "unknown".to_string()),
        );
        vars.insert(
            "analysis_date".to_string(),
            self.analysis_date.format("%Y-%m-%d").to_string(),
        );
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_codes_are_stable() {
        assert_eq!(
            AnalysisFailure::ApiError { status: 503 }.to_string(),
            "api_error:503"
        );
        assert_eq!(AnalysisFailure::Timeout.to_string(), "timeout");
        assert_eq!(AnalysisFailure::ParseError.to_string(), "parse_error");
        assert_eq!(
            AnalysisFailure::NoContentAfterToolCall.to_string(),
            "no_content_after_tool_call"
        );
        assert_eq!(
            AnalysisFailure::StreamInterrupted.to_string(),
            "stream_interrupted"
        );
        assert_eq!(
            AnalysisFailure::NoProviderConfigured.to_string(),
            "no_provider_configured"
        );
    }

    #[test]
    fn test_result_success_shape() {
        let result = AnalysisResult::ok("report", "gpt-4", Some(1200), Duration::from_millis(2500));
        assert!(result.success);
        assert_eq!(result.content.as_deref(), Some("report"));
        assert_eq!(result.tokens_used, Some(1200));
        assert!(result.error.is_none());
        assert!((result.response_time.unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_result_failure_shape() {
        let result = AnalysisResult::failed(AnalysisFailure::Timeout);
        assert!(!result.success);
        assert!(result.content.is_none());
        assert_eq!(result.error_code().as_deref(), Some("timeout"));
    }

    #[test]
    fn test_context_variables_fill_unknowns() {
        let ctx = AnalysisContext {
            code: "AAPL".into(),
            name: "Apple Inc.".into(),
            market: "US".into(),
            industry: None,
            exchange: Some("NASDAQ".into()),
            analysis_date: NaiveDate::from_ymd_opt(2026, 8, 30).unwrap(),
        };

        let vars = ctx.variables();
        assert_eq!(vars["code"], "AAPL");
        assert_eq!(vars["industry"], "unknown");
        assert_eq!(vars["exchange"], "NASDAQ");
        assert_eq!(vars["analysis_date"], "2026-08-30");
    }
}
