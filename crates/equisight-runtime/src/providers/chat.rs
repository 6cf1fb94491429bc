//! Shared OpenAI-style chat-completion wire plumbing.
//!
//! Both the OpenAI-compatible adapter and the reasoning adapter speak this
//! request/response shape; only their instructions and continuation
//! behavior differ.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use equisight_core::AnalysisFailure;

use super::ApiCredential;

/// Shared HTTP client. Per-request timeouts are applied per call.
pub(crate) fn http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::OnceLock<reqwest::Client> = std::sync::OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .build()
            .expect("failed to build HTTP client")
    })
}

/// One message in the running conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Echoed back verbatim when continuing after a tool-call round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<JsonValue>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// Echo an assistant response (including any tool calls) back into the
    /// message list for a continuation round.
    pub fn assistant_echo(message: &ChatResponseMessage) -> Self {
        Self {
            role: "assistant".to_string(),
            content: message.content.clone(),
            tool_calls: message.tool_calls.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

/// Assistant message as returned by the backend. Reasoning backends may
/// put their output under `reasoning_content`; tool-call rounds carry
/// `tool_calls` and no terminal `content`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<JsonValue>>,
}

impl ChatResponseMessage {
    /// Terminal text of this message: `content` first, then
    /// `reasoning_content`. Empty strings count as absent.
    pub fn text(&self) -> Option<&str> {
        non_empty(self.content.as_deref()).or_else(|| non_empty(self.reasoning_content.as_deref()))
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

#[derive(Debug, Deserialize)]
pub struct ChatUsage {
    pub total_tokens: u32,
}

/// Result of one chat round-trip.
#[derive(Debug)]
pub struct ChatExchange {
    pub message: ChatResponseMessage,
    pub tokens: Option<u32>,
    pub model: Option<String>,
}

/// Execute one chat-completion round-trip and classify failures.
///
/// Classification: non-2xx -> `api_error:<status>`; request timeout ->
/// `timeout`; transport failure before any HTTP status -> `api_error:0`;
/// undecodable body or empty `choices` -> `parse_error`.
pub async fn send_chat(
    url: &str,
    credential: &ApiCredential,
    request: &ChatRequest<'_>,
    timeout: Duration,
) -> Result<ChatExchange, AnalysisFailure> {
    let response = http_client()
        .post(url)
        .header("content-type", "application/json")
        .bearer_auth(credential.expose())
        .timeout(timeout)
        .json(request)
        .send()
        .await
        .map_err(|e| classify_transport_error(&e))?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(url, status = status.as_u16(), "chat completion rejected");
        return Err(AnalysisFailure::ApiError {
            status: status.as_u16(),
        });
    }

    let body: ChatResponse = response.json().await.map_err(|e| {
        if e.is_timeout() {
            AnalysisFailure::Timeout
        } else {
            tracing::warn!(url, error = %e, "chat completion body undecodable");
            AnalysisFailure::ParseError
        }
    })?;

    let tokens = body.usage.as_ref().map(|u| u.total_tokens);
    let model = body.model;
    let message = body
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or(AnalysisFailure::ParseError)?;

    Ok(ChatExchange {
        message,
        tokens,
        model,
    })
}

pub(crate) fn classify_transport_error(error: &reqwest::Error) -> AnalysisFailure {
    if error.is_timeout() {
        AnalysisFailure::Timeout
    } else {
        // Transport failure before any HTTP status was received.
        tracing::warn!(error = %error, "chat completion transport failure");
        AnalysisFailure::ApiError { status: 0 }
    }
}
