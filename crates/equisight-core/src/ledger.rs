//! Per-provider usage bookkeeping.
//!
//! The ledger is the only write path for provider usage counters and the
//! default flag. It is invoked exactly once per logical analysis attempt by
//! the orchestrator — adapter-internal protocol continuations (tool-call
//! round-trips, stream resumption) never reach it, so they cannot
//! double-count.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{ConfigStore, StoreError};

/// Aggregate usage across all provider configurations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_configs: usize,
    pub active_configs: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage over `total_requests`; 0.0 when nothing was recorded.
    pub success_rate: f64,
}

/// Records attempt outcomes against provider configurations.
#[derive(Clone)]
pub struct UsageLedger {
    configs: Arc<dyn ConfigStore>,
}

impl UsageLedger {
    pub fn new(configs: Arc<dyn ConfigStore>) -> Self {
        Self { configs }
    }

    /// Charge one attempt against `config_id`.
    ///
    /// Atomic: `total_requests`, exactly one outcome counter, and
    /// `last_used_at` move together.
    pub fn record_attempt(&self, config_id: u64, success: bool) -> Result<(), StoreError> {
        tracing::debug!(config_id, success, "recording analysis attempt");
        self.configs.update_usage_stats(config_id, success)
    }

    /// Make `config_id` the sole default in a single atomic swap.
    pub fn set_default(&self, config_id: u64) -> Result<(), StoreError> {
        self.configs.set_default(config_id)
    }

    /// Aggregate counters across every configuration.
    pub fn summary(&self) -> UsageSummary {
        let configs = self.configs.get_all();
        let mut summary = UsageSummary {
            total_configs: configs.len(),
            ..UsageSummary::default()
        };

        for config in &configs {
            if config.is_active {
                summary.active_configs += 1;
            }
            summary.total_requests += config.total_requests;
            summary.successful_requests += config.successful_requests;
            summary.failed_requests += config.failed_requests;
        }

        if summary.total_requests > 0 {
            summary.success_rate =
                (summary.successful_requests as f64 / summary.total_requests as f64) * 100.0;
        }
        summary
    }
}
