//! Deep-research adapter: streaming SSE backend with research phases.
//!
//! The backend streams server-sent events whose payloads carry a research
//! `phase` and a `status`. Chunks in the answer phase with status `typing`
//! are clarifying questions the model asks before researching; all other
//! content-bearing chunks accumulate into the final report. The stream is
//! terminal when a chunk reports `status == "finished"` in the answer
//! phase. Assembly is a pure state machine ([`StreamAssembler`]) so the
//! phase/status rules stay testable without a network.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use equisight_core::{AnalysisContext, AnalysisFailure, AnalysisResult, ProviderConfig};

use super::chat::{classify_transport_error, http_client};
use super::factory::ProviderFactory;
use super::{ConfigError, Provider, ProviderSettings, KIND_DEEP_RESEARCH};

const DEFAULT_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";

const RESEARCH_INSTRUCTIONS: &str = "You are a professional equity research \
analyst with live research capability. Investigate the requested stock in \
depth and produce a detailed, well-structured report with an explicit risk \
disclaimer.";

/// One decoded stream event.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StreamChunk {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    output: StreamOutput,
}

#[derive(Debug, Deserialize)]
struct StreamOutput {
    message: StreamChunk,
}

/// Decode one SSE line. Only `data:` lines carry payloads; comments,
/// event names and blank keep-alives are skipped.
fn parse_sse_line(line: &str) -> Option<Result<StreamChunk, AnalysisFailure>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamEnvelope>(data) {
        Ok(envelope) => Some(Ok(envelope.output.message)),
        Err(error) => {
            tracing::warn!(%error, "undecodable stream payload");
            Some(Err(AnalysisFailure::StreamInterrupted))
        }
    }
}

/// Pure accumulator for the phase/status stream protocol.
///
/// Feed chunks in arrival order; once finished, further chunks are ignored.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    clarifying: String,
    body: String,
    finished: bool,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &StreamChunk) {
        if self.finished {
            return;
        }
        if chunk.phase == "answer" && chunk.status == "finished" {
            if !chunk.content.is_empty() {
                self.body.push_str(&chunk.content);
            }
            self.finished = true;
            return;
        }
        if chunk.content.is_empty() {
            return;
        }
        // Typing in the answer phase is the model asking clarifying
        // questions before it researches; everything else is report body.
        if chunk.phase == "answer" && chunk.status == "typing" {
            self.clarifying.push_str(&chunk.content);
        } else {
            self.body.push_str(&chunk.content);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Final report text. A stream that produced only clarifying questions
    /// still yields them as the report so the caller sees what the model
    /// asked for.
    pub fn into_report(self) -> (String, Option<String>) {
        let clarifying = (!self.clarifying.is_empty()).then_some(self.clarifying);
        if self.body.is_empty() {
            match clarifying {
                Some(text) => (text, None),
                None => (String::new(), None),
            }
        } else {
            (self.body, clarifying)
        }
    }
}

/// Streaming deep-research adapter.
pub struct DeepResearchProvider {
    settings: ProviderSettings,
}

impl DeepResearchProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            settings: ProviderSettings::from_config(config, KIND_DEEP_RESEARCH)?,
        })
    }

    fn endpoint(&self) -> &str {
        self.settings.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.settings.model,
            "input": {
                "messages": [
                    { "role": "system", "content": RESEARCH_INSTRUCTIONS },
                    { "role": "user", "content": prompt }
                ]
            },
            "parameters": {
                "incremental_output": true,
                "max_tokens": self.settings.max_tokens,
                "temperature": self.settings.temperature,
                "enable_deep_research": self.settings.enable_deep_thinking
            }
        })
    }

    async fn stream_report(&self, prompt: &str) -> Result<StreamAssembler, AnalysisFailure> {
        let response = http_client()
            .post(self.endpoint())
            .header("content-type", "application/json")
            .header("X-DashScope-SSE", "enable")
            .bearer_auth(self.settings.credential.expose())
            .timeout(self.settings.timeout)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "deep-research request rejected");
            return Err(AnalysisFailure::ApiError {
                status: status.as_u16(),
            });
        }

        let mut assembler = StreamAssembler::new();
        let mut pending = String::new();
        let mut stream = response.bytes_stream();

        while let Some(piece) = stream.next().await {
            let bytes = piece.map_err(|e| {
                if e.is_timeout() {
                    AnalysisFailure::Timeout
                } else {
                    tracing::warn!(error = %e, "deep-research stream broke mid-flight");
                    AnalysisFailure::StreamInterrupted
                }
            })?;
            pending.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                if let Some(parsed) = parse_sse_line(line.trim_end()) {
                    assembler.push(&parsed?);
                }
                if assembler.is_finished() {
                    return Ok(assembler);
                }
            }
        }

        // Flush a final line that arrived without a trailing newline.
        if let Some(parsed) = parse_sse_line(pending.trim_end()) {
            assembler.push(&parsed?);
        }

        // A clean end of stream is terminal even without a finished chunk;
        // only mid-stream failures count as interruptions.
        if !assembler.is_finished() {
            tracing::debug!("deep-research stream closed without a finished chunk");
        }
        Ok(assembler)
    }
}

#[async_trait]
impl Provider for DeepResearchProvider {
    fn kind(&self) -> &'static str {
        KIND_DEEP_RESEARCH
    }

    fn supported_models(&self) -> &'static [&'static str] {
        &["qwen-deep-research", "qwen-max", "qwen-plus"]
    }

    async fn test_connection(&self) -> bool {
        // A deliberately tiny research request; any terminal stream counts.
        match self.stream_report("ping").await {
            Ok(_) => true,
            Err(error) => {
                tracing::info!(kind = KIND_DEEP_RESEARCH, %error, "connection test failed");
                false
            }
        }
    }

    async fn generate_analysis(&self, prompt: &str, ctx: &AnalysisContext) -> AnalysisResult {
        let started = Instant::now();
        tracing::info!(
            kind = KIND_DEEP_RESEARCH,
            model = %self.settings.model,
            stock = %ctx.code,
            "dispatching streaming analysis"
        );

        let assembler = match self.stream_report(prompt).await {
            Ok(assembler) => assembler,
            Err(error) => {
                tracing::warn!(kind = KIND_DEEP_RESEARCH, stock = %ctx.code, %error, "analysis failed");
                return AnalysisResult::failed(error).with_elapsed(started.elapsed());
            }
        };

        let (content, clarifying) = assembler.into_report();
        if content.is_empty() {
            tracing::warn!(kind = KIND_DEEP_RESEARCH, stock = %ctx.code, "stream finished with no content");
            return AnalysisResult::failed(AnalysisFailure::ParseError)
                .with_elapsed(started.elapsed());
        }

        // The streaming API reports no usage; estimate from text length.
        let tokens = Some(self.estimate_tokens(prompt) + self.estimate_tokens(&content));
        let elapsed = started.elapsed();
        tracing::info!(
            kind = KIND_DEEP_RESEARCH,
            stock = %ctx.code,
            content_chars = content.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "analysis complete"
        );

        let mut result =
            AnalysisResult::ok(content, self.settings.model.clone(), tokens, elapsed);
        if let Some(text) = clarifying {
            result = result.with_clarifying(text);
        }
        result
    }
}

/// Factory for [`DeepResearchProvider`].
pub struct DeepResearchFactory;

impl ProviderFactory for DeepResearchFactory {
    fn kind(&self) -> &'static str {
        KIND_DEEP_RESEARCH
    }

    fn description(&self) -> &'static str {
        "Streaming deep-research backend with clarifying-question phases"
    }

    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> {
        Ok(Arc::new(DeepResearchProvider::new(config)?))
    }
}
