//! Provider factory registry.
//!
//! Adapters register a factory keyed by kind tag; the orchestrator resolves
//! a stored configuration row to a live adapter through the registry without
//! knowing any concrete type.

use std::collections::BTreeMap;
use std::sync::Arc;

use equisight_core::ProviderConfig;

use super::deep_research::DeepResearchFactory;
use super::openai::OpenAiFactory;
use super::reasoner::ReasonerFactory;
use super::{ConfigError, Provider};

/// Builds a [`Provider`] from a configuration row.
pub trait ProviderFactory: Send + Sync {
    /// Kind tag this factory answers to (matches `provider_name`).
    fn kind(&self) -> &'static str;

    /// Human-readable summary for listings.
    fn description(&self) -> &'static str;

    /// Validate the row and build an adapter. Configuration defects fail
    /// here, before any network traffic.
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError>;
}

/// Kind-keyed registry of provider factories.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// An empty registry. Most callers want [`ProviderRegistry::with_defaults`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with every built-in adapter family.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiFactory));
        registry.register(Arc::new(ReasonerFactory));
        registry.register(Arc::new(DeepResearchFactory));
        registry
    }

    /// Register a factory. A later registration for the same kind replaces
    /// the earlier one.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        let kind = factory.kind().to_string();
        if self.factories.insert(kind.clone(), factory).is_some() {
            tracing::debug!(kind, "provider factory replaced");
        }
    }

    /// Build an adapter for a configuration row.
    pub fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> {
        let factory =
            self.factories
                .get(&config.provider_name)
                .ok_or_else(|| ConfigError::UnknownKind {
                    kind: config.provider_name.clone(),
                    available: self.available_kinds(),
                })?;
        factory.create(config)
    }

    /// Registered kind tags, sorted.
    pub fn available_kinds(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// (kind, description) pairs for listings.
    pub fn descriptions(&self) -> Vec<(String, &'static str)> {
        self.factories
            .iter()
            .map(|(kind, factory)| (kind.clone(), factory.description()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use equisight_core::{AnalysisContext, AnalysisResult};
    use std::collections::BTreeMap as Map;

    struct MockProvider;

    #[async_trait]
    impl Provider for MockProvider {
        fn kind(&self) -> &'static str {
            "mock"
        }

        fn supported_models(&self) -> &'static [&'static str] {
            &["mock-1"]
        }

        async fn test_connection(&self) -> bool {
            true
        }

        async fn generate_analysis(&self, _prompt: &str, _ctx: &AnalysisContext) -> AnalysisResult {
            AnalysisResult::ok("mock", "mock-1", None, std::time::Duration::ZERO)
        }
    }

    struct MockFactory;

    impl ProviderFactory for MockFactory {
        fn kind(&self) -> &'static str {
            "mock"
        }

        fn description(&self) -> &'static str {
            "mock backend"
        }

        fn create(&self, _config: &ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> {
            Ok(Arc::new(MockProvider))
        }
    }

    fn config(kind: &str) -> ProviderConfig {
        ProviderConfig {
            id: 1,
            provider_name: kind.into(),
            display_name: kind.into(),
            api_key: "sk-x".into(),
            model_name: "mock-1".into(),
            api_url: None,
            advanced: Map::new(),
            is_active: true,
            is_default: false,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            last_used_at: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_defaults_cover_builtin_kinds() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.has_kind("openai"));
        assert!(registry.has_kind("deepseek"));
        assert!(registry.has_kind("qwen"));
        assert_eq!(registry.available_kinds().len(), 3);
    }

    #[test]
    fn test_registered_factory_resolves() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockFactory));

        let provider = registry.create(&config("mock")).unwrap();
        assert_eq!(provider.kind(), "mock");
    }

    #[test]
    fn test_unknown_kind_names_available_alternatives() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockFactory));

        let error = registry.create(&config("nope")).unwrap_err();
        match error {
            ConfigError::UnknownKind { kind, available } => {
                assert_eq!(kind, "nope");
                assert_eq!(available, vec!["mock".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_builtin_factory_validates_config() {
        let registry = ProviderRegistry::with_defaults();
        let mut row = config("openai");
        row.api_key = String::new();
        assert!(matches!(
            registry.create(&row),
            Err(ConfigError::MissingCredential { .. })
        ));
    }
}
