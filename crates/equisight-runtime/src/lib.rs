//! # equisight-runtime
//!
//! Network-facing runtime for EquiSight's AI stock-analysis pipeline:
//! provider adapters, the factory registry, and the orchestrator that ties
//! provider selection, prompt resolution, dispatch and usage accounting
//! together.
//!
//! The deterministic domain layer (types, stores, prompt engine, ledger)
//! lives in `equisight-core`; this crate adds everything that talks to a
//! backend over HTTP.
//!
//! ## Failure discipline
//!
//! Adapters never raise for runtime faults. Every network, auth, protocol
//! or decoding problem is classified into an
//! [`AnalysisResult`](equisight_core::AnalysisResult) with a stable error
//! code. Only configuration defects surface as [`ConfigError`], because
//! those need an operator, not a retry.

pub mod orchestrator;
pub mod providers;

pub use orchestrator::{AnalysisOrchestrator, ImportReport, PromptSelector};
pub use providers::{
    ApiCredential, ConfigError, CredentialSource, DeepResearchFactory, DeepResearchProvider,
    OpenAiFactory, OpenAiProvider, Provider, ProviderFactory, ProviderRegistry, ProviderSettings,
    ReasonerFactory, ReasonerProvider, StreamAssembler, StreamChunk, KIND_DEEP_RESEARCH,
    KIND_OPENAI, KIND_REASONER,
};
