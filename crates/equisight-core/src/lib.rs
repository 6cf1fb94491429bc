//! # equisight-core
//!
//! Deterministic domain layer for EquiSight's AI stock-analysis pipeline.
//!
//! This crate owns everything that does not touch the network:
//! - The analysis data model ([`AnalysisContext`], [`AnalysisResult`], the
//!   classified [`AnalysisFailure`] taxonomy)
//! - Provider configuration rows and prompt template versions
//! - Store traits for the externally-owned persistence layer, with
//!   in-memory implementations
//! - The prompt template engine (`${variable}` substitution with verbatim
//!   passthrough of unresolved placeholders)
//! - The usage ledger (exactly-once attempt accounting, atomic default
//!   swaps)
//!
//! Network protocols and orchestration live in `equisight-runtime`.
//!
//! ## Key guarantees
//!
//! 1. **Counters balance**: `successful_requests + failed_requests ==
//!    total_requests` holds after every ledger write, including under
//!    concurrent attempts.
//! 2. **Single default**: at most one active provider config (and one
//!    template per category) carries the default flag; swaps are atomic.
//! 3. **Immutable versions**: a new template version always appends
//!    `max(existing) + 1`; old versions are never mutated.
//! 4. **No silent drops**: unresolved `${placeholder}`s survive rendering
//!    verbatim so callers can detect incomplete interpolation.

pub mod config;
pub mod ledger;
pub mod prompt;
pub mod store;
pub mod types;

pub use config::{NewProviderConfig, ProviderConfig};
pub use ledger::{UsageLedger, UsageSummary};
pub use prompt::{
    builtin_prompt, render, unresolved_placeholders, NewPromptTemplate, PromptCategory,
    PromptEngine, PromptError, PromptTemplate,
};
pub use store::{ConfigStore, MemoryConfigStore, MemoryPromptStore, PromptStore, StoreError};
pub use types::{AnalysisContext, AnalysisFailure, AnalysisResult};
