//! Analysis orchestration: provider selection, prompt resolution, dispatch,
//! and usage accounting.
//!
//! The orchestrator is the only component that writes the usage ledger.
//! One logical `generate_report` call produces at most one ledger write,
//! regardless of how many protocol round-trips the chosen adapter performs
//! internally. Provider resolution failures (`no_provider_configured`)
//! write nothing: there is no configuration to charge.

use std::sync::Arc;
use std::time::Duration;

use equisight_core::{
    AnalysisContext, AnalysisFailure, AnalysisResult, ConfigStore, NewProviderConfig,
    PromptCategory, PromptEngine, PromptStore, ProviderConfig, UsageLedger, UsageSummary,
};

use crate::providers::{
    ConfigError, ProviderRegistry, KIND_DEEP_RESEARCH, KIND_OPENAI, KIND_REASONER,
};

/// Default cap on one logical analysis call, protocol round-trips included.
/// Deep-research streams routinely run for minutes.
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(300);

/// How the caller wants the prompt chosen.
#[derive(Debug, Clone)]
pub enum PromptSelector {
    /// A stored template by name (default-flagged version first, then the
    /// highest active version). Unknown names fall back to the general
    /// category rather than failing the analysis.
    Named(String),
    /// The best template for a category, with a compiled-in fallback.
    Category(PromptCategory),
}

/// One provider definition importable from the environment.
struct EnvTemplate {
    kind: &'static str,
    display_name: &'static str,
    key_var: &'static str,
    model_var: &'static str,
    default_model: &'static str,
    deep_thinking: bool,
}

const ENV_TEMPLATES: &[EnvTemplate] = &[
    EnvTemplate {
        kind: KIND_OPENAI,
        display_name: "OpenAI",
        key_var: "OPENAI_API_KEY",
        model_var: "OPENAI_MODEL",
        default_model: "gpt-4",
        deep_thinking: false,
    },
    EnvTemplate {
        kind: KIND_REASONER,
        display_name: "DeepSeek",
        key_var: "DEEPSEEK_API_KEY",
        model_var: "DEEPSEEK_MODEL",
        default_model: "deepseek-reasoner",
        deep_thinking: true,
    },
    EnvTemplate {
        kind: KIND_DEEP_RESEARCH,
        display_name: "Qwen Deep Research",
        key_var: "QWEN_API_KEY",
        model_var: "QWEN_MODEL",
        default_model: "qwen-deep-research",
        deep_thinking: true,
    },
];

/// Outcome of an environment import pass.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Kind tags that were imported as new configurations.
    pub imported: Vec<String>,
    /// Kind tags that were skipped because a configuration already exists.
    pub skipped: Vec<String>,
    /// Human-readable errors for rows that could not be inserted.
    pub errors: Vec<String>,
}

/// Coordinates provider selection, prompt resolution and dispatch.
pub struct AnalysisOrchestrator {
    registry: ProviderRegistry,
    configs: Arc<dyn ConfigStore>,
    ledger: UsageLedger,
    prompts: PromptEngine,
    dispatch_timeout: Duration,
}

impl AnalysisOrchestrator {
    pub fn new(
        registry: ProviderRegistry,
        configs: Arc<dyn ConfigStore>,
        prompts: Arc<dyn PromptStore>,
    ) -> Self {
        Self {
            registry,
            ledger: UsageLedger::new(configs.clone()),
            configs,
            prompts: PromptEngine::new(prompts),
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Cap one logical analysis call at `timeout` (protocol round-trips
    /// included). On expiry the result is a `timeout` failure and the
    /// attempt is still charged to the configuration.
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn usage_summary(&self) -> UsageSummary {
        self.ledger.summary()
    }

    /// Pick the configuration for this call: the requested id when active,
    /// else the default, else the first active configuration.
    fn resolve_provider(&self, provider_id: Option<u64>) -> Option<ProviderConfig> {
        if let Some(id) = provider_id {
            match self.configs.get_by_id(id) {
                Some(config) if config.is_active => return Some(config),
                Some(_) => {
                    tracing::warn!(config_id = id, "requested config is inactive, falling back");
                }
                None => {
                    tracing::warn!(config_id = id, "requested config does not exist, falling back");
                }
            }
        }

        self.configs
            .get_default_config()
            .or_else(|| self.configs.get_active_configs().into_iter().next())
    }

    fn resolve_prompt(&self, ctx: &AnalysisContext, selector: Option<PromptSelector>) -> String {
        let variables = ctx.variables();
        match selector {
            Some(PromptSelector::Named(name)) => {
                match self.prompts.resolve_by_name(&name, &variables) {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::warn!(%error, "falling back to general category");
                        self.prompts.resolve(&PromptCategory::general(), &variables)
                    }
                }
            }
            Some(PromptSelector::Category(category)) => {
                self.prompts.resolve(&category, &variables)
            }
            None => self.prompts.resolve(&PromptCategory::general(), &variables),
        }
    }

    /// Run one analysis end to end.
    ///
    /// Runtime faults come back inside the [`AnalysisResult`]; only
    /// configuration defects (unknown kind, unusable row) are raised.
    /// Exactly one ledger write happens per dispatched call; none when no
    /// provider could be resolved.
    pub async fn generate_report(
        &self,
        ctx: &AnalysisContext,
        provider_id: Option<u64>,
        prompt: Option<PromptSelector>,
    ) -> Result<AnalysisResult, ConfigError> {
        let Some(config) = self.resolve_provider(provider_id) else {
            tracing::warn!(stock = %ctx.code, "no active provider configuration");
            return Ok(AnalysisResult::failed(AnalysisFailure::NoProviderConfigured));
        };

        let provider = self.registry.create(&config)?;
        let rendered = self.resolve_prompt(ctx, prompt);

        tracing::info!(
            stock = %ctx.code,
            provider = %config.provider_name,
            config_id = config.id,
            "dispatching analysis"
        );

        let result = match tokio::time::timeout(
            self.dispatch_timeout,
            provider.generate_analysis(&rendered, ctx),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    stock = %ctx.code,
                    config_id = config.id,
                    timeout_secs = self.dispatch_timeout.as_secs(),
                    "dispatch window expired"
                );
                AnalysisResult::failed(AnalysisFailure::Timeout)
                    .with_elapsed(self.dispatch_timeout)
            }
        };

        // The single ledger write for this logical call. Bookkeeping
        // failures must not turn a finished report into an error.
        if let Err(error) = self.ledger.record_attempt(config.id, result.success) {
            tracing::warn!(config_id = config.id, %error, "failed to record attempt");
        }

        Ok(result)
    }

    /// Probe a configuration's reachability and credential validity.
    ///
    /// Diagnostics only: never writes the ledger, and an unusable row
    /// answers `false` rather than raising.
    pub async fn test_provider(&self, config: &ProviderConfig) -> bool {
        let provider = match self.registry.create(config) {
            Ok(provider) => provider,
            Err(error) => {
                tracing::warn!(provider = %config.provider_name, %error, "config unusable");
                return false;
            }
        };

        match tokio::time::timeout(self.dispatch_timeout, provider.test_connection()).await {
            Ok(reachable) => reachable,
            Err(_) => {
                tracing::warn!(provider = %config.provider_name, "connection test timed out");
                false
            }
        }
    }

    /// Import provider configurations from well-known environment
    /// variables (`OPENAI_API_KEY`, `DEEPSEEK_API_KEY`, `QWEN_API_KEY`,
    /// plus optional `*_MODEL` overrides).
    pub fn import_from_env(&self) -> ImportReport {
        self.import_with(|var| std::env::var(var).ok())
    }

    /// Environment-variable import with an injectable lookup.
    ///
    /// A kind whose key variable is unset or blank is silently skipped. A
    /// kind that already has a configuration row is reported as skipped.
    /// The first imported configuration becomes the default when no
    /// default exists yet.
    pub fn import_with(&self, lookup: impl Fn(&str) -> Option<String>) -> ImportReport {
        let mut report = ImportReport::default();

        for template in ENV_TEMPLATES {
            let Some(api_key) = lookup(template.key_var).filter(|k| !k.trim().is_empty()) else {
                continue;
            };

            if self.configs.get_by_provider(template.kind).is_some() {
                tracing::debug!(kind = template.kind, "already configured, skipping import");
                report.skipped.push(template.kind.to_string());
                continue;
            }

            let model_name = lookup(template.model_var)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| template.default_model.to_string());

            let mut advanced = std::collections::BTreeMap::new();
            advanced.insert("max_tokens".to_string(), serde_json::json!(15_000));
            advanced.insert("temperature".to_string(), serde_json::json!(0.7));
            if template.deep_thinking {
                advanced.insert("enable_deep_thinking".to_string(), serde_json::json!(true));
            }

            let is_default = self.configs.get_default_config().is_none();
            match self.configs.insert(NewProviderConfig {
                provider_name: template.kind.to_string(),
                display_name: template.display_name.to_string(),
                api_key,
                model_name,
                api_url: None,
                advanced,
                is_active: true,
                is_default,
            }) {
                Ok(config) => {
                    tracing::info!(
                        kind = template.kind,
                        config_id = config.id,
                        is_default,
                        "imported provider from environment"
                    );
                    report.imported.push(template.kind.to_string());
                }
                Err(error) => {
                    report
                        .errors
                        .push(format!("{}: {}", template.kind, error));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use equisight_core::{MemoryConfigStore, MemoryPromptStore};

    use crate::providers::{Provider, ProviderFactory};

    enum MockBehavior {
        Succeed,
        Fail,
        Sleep(Duration),
    }

    struct MockProvider {
        behavior: MockBehavior,
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn kind(&self) -> &'static str {
            "mock"
        }

        fn supported_models(&self) -> &'static [&'static str] {
            &["mock-1"]
        }

        async fn test_connection(&self) -> bool {
            matches!(self.behavior, MockBehavior::Succeed)
        }

        async fn generate_analysis(&self, prompt: &str, _ctx: &AnalysisContext) -> AnalysisResult {
            match self.behavior {
                MockBehavior::Succeed => AnalysisResult::ok(
                    format!("report for: {prompt}"),
                    "mock-1",
                    Some(42),
                    Duration::from_millis(1),
                ),
                MockBehavior::Fail => {
                    AnalysisResult::failed(AnalysisFailure::ApiError { status: 503 })
                }
                MockBehavior::Sleep(duration) => {
                    tokio::time::sleep(duration).await;
                    AnalysisResult::ok("late", "mock-1", None, duration)
                }
            }
        }
    }

    struct MockFactory {
        behavior: fn() -> MockBehavior,
    }

    impl ProviderFactory for MockFactory {
        fn kind(&self) -> &'static str {
            "mock"
        }

        fn description(&self) -> &'static str {
            "mock backend"
        }

        fn create(&self, _config: &ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> {
            Ok(Arc::new(MockProvider {
                behavior: (self.behavior)(),
            }))
        }
    }

    fn ctx() -> AnalysisContext {
        AnalysisContext {
            code: "AAPL".into(),
            name: "Apple Inc.".into(),
            market: "US".into(),
            industry: Some("Consumer Electronics".into()),
            exchange: Some("NASDAQ".into()),
            analysis_date: NaiveDate::from_ymd_opt(2026, 8, 30).unwrap(),
        }
    }

    fn orchestrator(behavior: fn() -> MockBehavior) -> (AnalysisOrchestrator, Arc<MemoryConfigStore>) {
        let configs = Arc::new(MemoryConfigStore::new());
        let prompts = Arc::new(MemoryPromptStore::new());
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockFactory { behavior }));
        (
            AnalysisOrchestrator::new(registry, configs.clone(), prompts),
            configs,
        )
    }

    fn seed_config(configs: &MemoryConfigStore, kind: &str, active: bool) -> ProviderConfig {
        configs
            .insert(NewProviderConfig {
                provider_name: kind.to_string(),
                display_name: kind.to_string(),
                api_key: "sk-test".into(),
                model_name: "mock-1".into(),
                api_url: None,
                advanced: BTreeMap::new(),
                is_active: active,
                is_default: false,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_records_exactly_one_attempt() {
        let (orchestrator, configs) = orchestrator(|| MockBehavior::Succeed);
        let config = seed_config(&configs, "mock", true);

        let result = orchestrator
            .generate_report(&ctx(), None, None)
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.content.unwrap().contains("AAPL"));

        let row = configs.get_by_id(config.id).unwrap();
        assert_eq!(row.total_requests, 1);
        assert_eq!(row.successful_requests, 1);
        assert_eq!(row.failed_requests, 0);
    }

    #[tokio::test]
    async fn test_failure_recorded_and_classified() {
        let (orchestrator, configs) = orchestrator(|| MockBehavior::Fail);
        let config = seed_config(&configs, "mock", true);

        let result = orchestrator
            .generate_report(&ctx(), None, None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code().as_deref(), Some("api_error:503"));

        let row = configs.get_by_id(config.id).unwrap();
        assert_eq!(row.total_requests, 1);
        assert_eq!(row.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_no_provider_writes_nothing() {
        let (orchestrator, _configs) = orchestrator(|| MockBehavior::Succeed);

        let result = orchestrator
            .generate_report(&ctx(), None, None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code().as_deref(), Some("no_provider_configured"));
        assert_eq!(orchestrator.usage_summary().total_requests, 0);
    }

    #[tokio::test]
    async fn test_inactive_requested_id_falls_back_to_active() {
        let (orchestrator, configs) = orchestrator(|| MockBehavior::Succeed);
        let inactive = seed_config(&configs, "mock-off", false);
        let active = seed_config(&configs, "mock", true);

        let result = orchestrator
            .generate_report(&ctx(), Some(inactive.id), None)
            .await
            .unwrap();
        assert!(result.success);

        // The attempt lands on the fallback config, not the inactive one.
        assert_eq!(configs.get_by_id(inactive.id).unwrap().total_requests, 0);
        assert_eq!(configs.get_by_id(active.id).unwrap().total_requests, 1);
    }

    #[tokio::test]
    async fn test_dispatch_window_maps_to_timeout() {
        let (orchestrator, configs) =
            orchestrator(|| MockBehavior::Sleep(Duration::from_secs(30)));
        let config = seed_config(&configs, "mock", true);
        let orchestrator = orchestrator.with_dispatch_timeout(Duration::from_millis(20));

        let result = orchestrator
            .generate_report(&ctx(), None, None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code().as_deref(), Some("timeout"));

        // An expired window is still a charged attempt.
        let row = configs.get_by_id(config.id).unwrap();
        assert_eq!(row.total_requests, 1);
        assert_eq!(row.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_unknown_prompt_name_falls_back_to_general() {
        let (orchestrator, configs) = orchestrator(|| MockBehavior::Succeed);
        seed_config(&configs, "mock", true);

        let result = orchestrator
            .generate_report(
                &ctx(),
                None,
                Some(PromptSelector::Named("does-not-exist".into())),
            )
            .await
            .unwrap();
        assert!(result.success);
        // The general builtin mentions the interpolated stock name.
        assert!(result.content.unwrap().contains("Apple Inc."));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_a_config_error() {
        let (orchestrator, configs) = orchestrator(|| MockBehavior::Succeed);
        seed_config(&configs, "not-registered", true);

        let error = orchestrator
            .generate_report(&ctx(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(error, ConfigError::UnknownKind { .. }));
        // Raised before dispatch: nothing charged.
        assert_eq!(orchestrator.usage_summary().total_requests, 0);
    }

    #[tokio::test]
    async fn test_test_provider_never_writes_ledger() {
        let (orchestrator, configs) = orchestrator(|| MockBehavior::Succeed);
        let config = seed_config(&configs, "mock", true);

        assert!(orchestrator.test_provider(&config).await);
        assert_eq!(configs.get_by_id(config.id).unwrap().total_requests, 0);
    }

    #[test]
    fn test_import_with_creates_defaults_and_skips_missing() {
        let (orchestrator, configs) = orchestrator(|| MockBehavior::Succeed);

        let env: BTreeMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-openai"),
            ("DEEPSEEK_API_KEY", "sk-deepseek"),
            ("DEEPSEEK_MODEL", "deepseek-chat"),
            // QWEN_API_KEY absent on purpose.
        ]
        .into_iter()
        .collect();

        let report = orchestrator.import_with(|var| env.get(var).map(|v| v.to_string()));
        assert_eq!(report.imported, vec!["openai", "deepseek"]);
        assert!(report.skipped.is_empty());
        assert!(report.errors.is_empty());

        // First import becomes the default.
        let default = configs.get_default_config().unwrap();
        assert_eq!(default.provider_name, "openai");

        let deepseek = configs.get_by_provider("deepseek").unwrap();
        assert_eq!(deepseek.model_name, "deepseek-chat");
        assert_eq!(deepseek.advanced_bool("enable_deep_thinking"), Some(true));
        assert!(!deepseek.is_default);
    }

    #[test]
    fn test_import_with_skips_existing_rows() {
        let (orchestrator, configs) = orchestrator(|| MockBehavior::Succeed);
        seed_config(&configs, "openai", true);

        let report =
            orchestrator.import_with(|var| (var == "OPENAI_API_KEY").then(|| "sk-x".to_string()));
        assert!(report.imported.is_empty());
        assert_eq!(report.skipped, vec!["openai"]);
    }

    #[test]
    fn test_import_with_blank_key_is_skipped_silently() {
        let (orchestrator, _configs) = orchestrator(|| MockBehavior::Succeed);
        let report = orchestrator.import_with(|_| Some("   ".to_string()));
        assert!(report.imported.is_empty());
        assert!(report.skipped.is_empty());
        assert!(report.errors.is_empty());
    }
}
