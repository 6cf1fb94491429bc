//! OpenAI-compatible adapter: one completion request, one response.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use equisight_core::{AnalysisContext, AnalysisFailure, AnalysisResult, ProviderConfig};

use super::chat::{send_chat, ChatMessage, ChatRequest};
use super::factory::ProviderFactory;
use super::{ConfigError, Provider, ProviderSettings, KIND_OPENAI};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = "You are a professional equity research analyst. \
Analyze the requested stock using the information provided and produce a \
detailed, well-structured report with explicit reasoning and a risk \
disclaimer.";

/// Single-shot chat-completion adapter for OpenAI-compatible backends.
pub struct OpenAiProvider {
    settings: ProviderSettings,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            settings: ProviderSettings::from_config(config, KIND_OPENAI)?,
        })
    }

    fn endpoint(&self) -> &str {
        self.settings.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> &'static str {
        KIND_OPENAI
    }

    fn supported_models(&self) -> &'static [&'static str] {
        &["gpt-4", "gpt-4o", "gpt-4o-mini", "gpt-3.5-turbo"]
    }

    async fn test_connection(&self) -> bool {
        let messages = [ChatMessage::user("ping")];
        let request = ChatRequest {
            model: &self.settings.model,
            messages: &messages,
            max_tokens: 8,
            temperature: 0.0,
        };

        match send_chat(self.endpoint(), &self.settings.credential, &request, self.settings.timeout)
            .await
        {
            Ok(exchange) => exchange.message.text().is_some(),
            Err(error) => {
                tracing::info!(kind = KIND_OPENAI, %error, "connection test failed");
                false
            }
        }
    }

    async fn generate_analysis(&self, prompt: &str, ctx: &AnalysisContext) -> AnalysisResult {
        let started = Instant::now();
        tracing::info!(
            kind = KIND_OPENAI,
            model = %self.settings.model,
            stock = %ctx.code,
            prompt_chars = prompt.len(),
            "dispatching analysis"
        );

        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let request = ChatRequest {
            model: &self.settings.model,
            messages: &messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let exchange = match send_chat(
            self.endpoint(),
            &self.settings.credential,
            &request,
            self.settings.timeout,
        )
        .await
        {
            Ok(exchange) => exchange,
            Err(error) => {
                tracing::warn!(kind = KIND_OPENAI, stock = %ctx.code, %error, "analysis failed");
                return AnalysisResult::failed(error).with_elapsed(started.elapsed());
            }
        };

        match exchange.message.text() {
            Some(content) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    kind = KIND_OPENAI,
                    stock = %ctx.code,
                    content_chars = content.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "analysis complete"
                );
                AnalysisResult::ok(
                    content,
                    exchange.model.unwrap_or_else(|| self.settings.model.clone()),
                    exchange.tokens,
                    elapsed,
                )
            }
            None => {
                tracing::warn!(kind = KIND_OPENAI, stock = %ctx.code, "response carried no content");
                AnalysisResult::failed(AnalysisFailure::ParseError).with_elapsed(started.elapsed())
            }
        }
    }
}

/// Factory for [`OpenAiProvider`].
pub struct OpenAiFactory;

impl ProviderFactory for OpenAiFactory {
    fn kind(&self) -> &'static str {
        KIND_OPENAI
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible single-shot chat completion"
    }

    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> {
        Ok(Arc::new(OpenAiProvider::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(api_key: &str) -> ProviderConfig {
        ProviderConfig {
            id: 1,
            provider_name: KIND_OPENAI.into(),
            display_name: "OpenAI".into(),
            api_key: api_key.into(),
            model_name: "gpt-4".into(),
            api_url: Some("https://proxy.example.com/v1/chat/completions".into()),
            advanced: BTreeMap::new(),
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
    fn test_provider_uses_configured_endpoint() {
        let provider = OpenAiProvider::new(&config("sk-x")).unwrap();
        assert_eq!(provider.endpoint(), "https://proxy.example.com/v1/chat/completions");
        assert_eq!(provider.kind(), KIND_OPENAI);
    }

    #[test]
    fn test_factory_rejects_blank_credential() {
        let factory = OpenAiFactory;
        assert!(matches!(
            factory.create(&config("")),
            Err(ConfigError::MissingCredential { .. })
        ));
    }

    #[test]
    fn test_supported_models_advertised() {
        let provider = OpenAiProvider::new(&config("sk-x")).unwrap();
        assert!(provider.supported_models().contains(&"gpt-4"));
    }
}
