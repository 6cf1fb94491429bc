//! Reasoning-model adapter (DeepSeek-style implicit multi-step thinking).
//!
//! Same wire shape as the OpenAI-compatible adapter, with two twists:
//!
//! 1. When `enable_deep_thinking` is set, the system instructions ask for
//!    explicit step-by-step reasoning. The flag never changes the protocol,
//!    only the embedded instructions.
//! 2. A response carrying `tool_calls` instead of terminal content triggers
//!    exactly one continuation round: the assistant's tool-call message is
//!    appended to the running message list and the conversation is resent.
//!    If the second round also lacks content, the attempt is a protocol
//!    failure (`no_content_after_tool_call`) — never a third round.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use equisight_core::{AnalysisContext, AnalysisFailure, AnalysisResult, ProviderConfig};

use super::chat::{send_chat, ChatMessage, ChatRequest, ChatResponseMessage};
use super::factory::ProviderFactory;
use super::{ConfigError, Provider, ProviderSettings, KIND_REASONER};

const DEFAULT_ENDPOINT: &str = "https://api.deepseek.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = "You are a professional equity research analyst. \
Analyze the requested stock using the information provided and produce a \
detailed, well-structured report with an explicit risk disclaimer.";

const DEEP_THINKING_SYSTEM_PROMPT: &str = "You are a professional equity \
research analyst. Think through the problem step by step, reasoning across \
multiple stages before concluding, then produce a detailed, well-structured \
report with an explicit risk disclaimer.";

/// What the first round-trip tells us to do next.
#[derive(Debug, PartialEq, Eq)]
enum RoundAction {
    /// Terminal content arrived; we are done.
    Done(String),
    /// The model requested tool execution; continue with a second round.
    Continue,
    /// Neither content nor tool calls: malformed response.
    Malformed,
}

fn classify_round(message: &ChatResponseMessage) -> RoundAction {
    if let Some(text) = message.text() {
        return RoundAction::Done(text.to_string());
    }
    if message.has_tool_calls() {
        return RoundAction::Continue;
    }
    RoundAction::Malformed
}

/// Outcome of the continuation round. A second contentless response is a
/// protocol failure, not grounds for another retry.
fn continuation_outcome(message: &ChatResponseMessage) -> Result<String, AnalysisFailure> {
    message
        .text()
        .map(str::to_string)
        .ok_or(AnalysisFailure::NoContentAfterToolCall)
}

/// Adapter for reasoning backends with implicit multi-step thinking.
pub struct ReasonerProvider {
    settings: ProviderSettings,
}

impl ReasonerProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            settings: ProviderSettings::from_config(config, KIND_REASONER)?,
        })
    }

    fn endpoint(&self) -> &str {
        self.settings.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    fn system_prompt(&self) -> &'static str {
        if self.settings.enable_deep_thinking {
            DEEP_THINKING_SYSTEM_PROMPT
        } else {
            SYSTEM_PROMPT
        }
    }
}

#[async_trait]
impl Provider for ReasonerProvider {
    fn kind(&self) -> &'static str {
        KIND_REASONER
    }

    fn supported_models(&self) -> &'static [&'static str] {
        &["deepseek-reasoner", "deepseek-chat"]
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
                tracing::info!(kind = KIND_REASONER, %error, "connection test failed");
                false
            }
        }
    }

    async fn generate_analysis(&self, prompt: &str, ctx: &AnalysisContext) -> AnalysisResult {
        let started = Instant::now();
        tracing::info!(
            kind = KIND_REASONER,
            model = %self.settings.model,
            stock = %ctx.code,
            deep_thinking = self.settings.enable_deep_thinking,
            "dispatching analysis"
        );

        let mut messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(prompt),
        ];
        let request = ChatRequest {
            model: &self.settings.model,
            messages: &messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let first = match send_chat(
            self.endpoint(),
            &self.settings.credential,
            &request,
            self.settings.timeout,
        )
        .await
        {
            Ok(exchange) => exchange,
            Err(error) => {
                tracing::warn!(kind = KIND_REASONER, stock = %ctx.code, %error, "analysis failed");
                return AnalysisResult::failed(error).with_elapsed(started.elapsed());
            }
        };

        let mut tokens = first.tokens;
        let model = first
            .model
            .clone()
            .unwrap_or_else(|| self.settings.model.clone());

        match classify_round(&first.message) {
            RoundAction::Done(content) => {
                AnalysisResult::ok(content, model, tokens, started.elapsed())
            }
            RoundAction::Malformed => {
                tracing::warn!(kind = KIND_REASONER, stock = %ctx.code, "response carried neither content nor tool calls");
                AnalysisResult::failed(AnalysisFailure::ParseError).with_elapsed(started.elapsed())
            }
            RoundAction::Continue => {
                tracing::info!(kind = KIND_REASONER, stock = %ctx.code, "tool calls requested, continuing");
                messages.push(ChatMessage::assistant_echo(&first.message));

                let request = ChatRequest {
                    model: &self.settings.model,
                    messages: &messages,
                    max_tokens: self.settings.max_tokens,
                    temperature: self.settings.temperature,
                };
                let second = match send_chat(
                    self.endpoint(),
                    &self.settings.credential,
                    &request,
                    self.settings.timeout,
                )
                .await
                {
                    Ok(exchange) => exchange,
                    Err(error) => {
                        tracing::warn!(kind = KIND_REASONER, stock = %ctx.code, %error, "continuation failed");
                        return AnalysisResult::failed(error).with_elapsed(started.elapsed());
                    }
                };

                if let (Some(a), Some(b)) = (tokens, second.tokens) {
                    tokens = Some(a + b);
                } else {
                    tokens = second.tokens.or(tokens);
                }

                match continuation_outcome(&second.message) {
                    Ok(content) => AnalysisResult::ok(content, model, tokens, started.elapsed()),
                    Err(error) => {
                        tracing::warn!(kind = KIND_REASONER, stock = %ctx.code, %error, "continuation produced no content");
                        AnalysisResult::failed(error).with_elapsed(started.elapsed())
                    }
                }
            }
        }
    }
}

/// Factory for [`ReasonerProvider`].
pub struct ReasonerFactory;

impl ProviderFactory for ReasonerFactory {
    fn kind(&self) -> &'static str {
        KIND_REASONER
    }

    fn description(&self) -> &'static str {
        "Reasoning model with implicit multi-step thinking and tool-call continuation"
    }

    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> {
        Ok(Arc::new(ReasonerProvider::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn message(content: Option<&str>, tool_calls: bool) -> ChatResponseMessage {
        ChatResponseMessage {
            content: content.map(str::to_string),
            reasoning_content: None,
            tool_calls: tool_calls.then(|| vec![json!({"id": "call_1"})]),
        }
    }

    #[test]
    fn test_terminal_content_finishes_first_round() {
        assert_eq!(
            classify_round(&message(Some("report"), false)),
            RoundAction::Done("report".to_string())
        );
    }

    #[test]
    fn test_tool_calls_without_content_continue() {
        assert_eq!(classify_round(&message(None, true)), RoundAction::Continue);
    }

    #[test]
    fn test_content_wins_over_tool_calls() {
        assert_eq!(
            classify_round(&message(Some("report"), true)),
            RoundAction::Done("report".to_string())
        );
    }

    #[test]
    fn test_empty_response_is_malformed() {
        assert_eq!(classify_round(&message(None, false)), RoundAction::Malformed);
    }

    #[test]
    fn test_continuation_with_content_succeeds() {
        assert_eq!(
            continuation_outcome(&message(Some("X"), false)),
            Ok("X".to_string())
        );
    }

    #[test]
    fn test_second_contentless_round_is_protocol_failure() {
        assert_eq!(
            continuation_outcome(&message(None, true)),
            Err(AnalysisFailure::NoContentAfterToolCall)
        );
        assert_eq!(
            continuation_outcome(&message(None, false)),
            Err(AnalysisFailure::NoContentAfterToolCall)
        );
    }

    #[test]
    fn test_deep_thinking_only_changes_instructions() {
        let base = ProviderConfig {
            id: 1,
            provider_name: KIND_REASONER.into(),
            display_name: "DeepSeek".into(),
            api_key: "sk-x".into(),
            model_name: "deepseek-reasoner".into(),
            api_url: None,
            advanced: BTreeMap::new(),
            is_active: true,
            is_default: false,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            last_used_at: None,
            created_at: chrono::Utc::now(),
        };

        let plain = ReasonerProvider::new(&base).unwrap();
        assert!(!plain.system_prompt().contains("step by step"));

        let mut config = base;
        config
            .advanced
            .insert("enable_deep_thinking".to_string(), json!(true));
        let thinking = ReasonerProvider::new(&config).unwrap();
        assert!(thinking.system_prompt().contains("step by step"));
        // Same endpoint either way: the flag is instructions-only.
        assert_eq!(plain.endpoint(), thinking.endpoint());
    }
}
