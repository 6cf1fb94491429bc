//! EquiSight command-line interface.
//!
//! Wires the in-memory stores, the provider registry and the orchestrator
//! together, imports provider credentials from the environment, and exposes
//! the analysis pipeline as subcommands.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};

use equisight_core::{
    AnalysisContext, ConfigStore, MemoryConfigStore, MemoryPromptStore, PromptCategory,
};
use equisight_runtime::{AnalysisOrchestrator, PromptSelector, ProviderRegistry};

#[derive(Parser)]
#[command(name = "equisight", version, about = "AI-powered stock analysis")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an analysis report for a stock.
    Analyze {
        /// Ticker or exchange-local code, e.g. AAPL or 600519.
        code: String,

        /// Display name; defaults to the code.
        #[arg(long)]
        name: Option<String>,

        /// Market tag, e.g. US or CN.
        #[arg(long, default_value = "US")]
        market: String,

        /// Industry classification.
        #[arg(long)]
        industry: Option<String>,

        /// Listing exchange.
        #[arg(long)]
        exchange: Option<String>,

        /// Analysis date (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Provider configuration id to use instead of the default.
        #[arg(long)]
        provider_id: Option<u64>,

        /// Stored prompt template name.
        #[arg(long, conflicts_with = "category")]
        prompt_name: Option<String>,

        /// Prompt category: fundamental, technical, or any custom tag.
        #[arg(long)]
        category: Option<String>,

        /// Emit the full result as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },

    /// Test connectivity for every configured provider.
    TestProviders,

    /// Import provider configurations from environment variables.
    ImportEnv,

    /// List registered provider kinds and configured providers.
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let configs = Arc::new(MemoryConfigStore::new());
    let prompts = Arc::new(MemoryPromptStore::new());
    let orchestrator = AnalysisOrchestrator::new(
        ProviderRegistry::with_defaults(),
        configs.clone(),
        prompts,
    );

    // Sessions are not persisted; each invocation starts from the
    // environment.
    let report = orchestrator.import_from_env();
    for error in &report.errors {
        tracing::warn!(%error, "environment import problem");
    }

    match cli.command {
        Command::Analyze {
            code,
            name,
            market,
            industry,
            exchange,
            date,
            provider_id,
            prompt_name,
            category,
            json,
        } => {
            let ctx = AnalysisContext {
                name: name.unwrap_or_else(|| code.clone()),
                code,
                market,
                industry,
                exchange,
                analysis_date: date.unwrap_or_else(|| Utc::now().date_naive()),
            };

            let selector = match (prompt_name, category) {
                (Some(name), _) => Some(PromptSelector::Named(name)),
                (None, Some(tag)) => Some(PromptSelector::Category(PromptCategory::from(tag))),
                (None, None) => None,
            };

            let result = orchestrator
                .generate_report(&ctx, provider_id, selector)
                .await
                .context("analysis could not be dispatched")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.success {
                if let Some(clarifying) = &result.clarifying {
                    eprintln!("--- clarifying ---\n{clarifying}\n");
                }
                println!("{}", result.content.as_deref().unwrap_or_default());
            } else {
                bail!(
                    "analysis failed: {}",
                    result.error_code().unwrap_or_else(|| "unknown".to_string())
                );
            }
        }

        Command::TestProviders => {
            let all = configs.get_all();
            if all.is_empty() {
                bail!("no providers configured; set OPENAI_API_KEY, DEEPSEEK_API_KEY or QWEN_API_KEY");
            }
            let mut failures = 0usize;
            for config in all {
                let ok = orchestrator.test_provider(&config).await;
                println!(
                    "{:<12} {:<24} {}",
                    config.provider_name,
                    config.model_name,
                    if ok { "ok" } else { "FAILED" }
                );
                if !ok {
                    failures += 1;
                }
            }
            if failures > 0 {
                bail!("{failures} provider(s) failed the connection test");
            }
        }

        Command::ImportEnv => {
            for kind in &report.imported {
                println!("imported {kind}");
            }
            for kind in &report.skipped {
                println!("skipped {kind} (already configured)");
            }
            if report.imported.is_empty() && report.skipped.is_empty() {
                println!("nothing to import; no provider API keys found in the environment");
            }
        }

        Command::Providers => {
            println!("registered kinds:");
            for (kind, description) in orchestrator.registry().descriptions() {
                println!("  {kind:<12} {description}");
            }

            println!("\nconfigured providers:");
            let all = configs.get_all();
            if all.is_empty() {
                println!("  (none)");
            }
            for config in all {
                println!(
                    "  #{:<4} {:<12} {:<24} active={} default={} requests={} success_rate={:.1}%",
                    config.id,
                    config.provider_name,
                    config.model_name,
                    config.is_active,
                    config.is_default,
                    config.total_requests,
                    config.success_rate(),
                );
            }

            let summary = orchestrator.usage_summary();
            println!(
                "\ntotals: {} requests, {} ok, {} failed",
                summary.total_requests, summary.successful_requests, summary.failed_requests
            );
        }
    }

    Ok(())
}
