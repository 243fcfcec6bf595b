//! finaudit - run the zero-trust financial extraction pipeline on a dossier.
//!
//! Prints `{ "record": {...}, "audit_trail": {...} }` as JSON on stdout;
//! logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use finaudit::{
    ChatBridgeConfig, ChatCompletionBridge, FinancialRecord, FreeTextSearch, Pipeline,
    TextUnderstanding,
};
use finaudit_common::config::Config;
use finaudit_common::logging::init_logging;
use finaudit_common::{AuditMode, Validate};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "finaudit")]
#[command(version)]
#[command(about = "Extract, audit and cross-check a company's financials", long_about = None)]
struct Cli {
    /// Subject identifier, e.g. a ticker
    subject: String,

    /// Raw dossier text file
    #[arg(short, long)]
    dossier: PathBuf,

    /// Existing partial record (JSON) used to fill extraction gaps
    #[arg(long)]
    partial: Option<PathBuf>,

    /// Config file (defaults to ~/.finaudit/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Audit mode override: standard, quick or full
    #[arg(long)]
    mode: Option<String>,

    /// Disable the free-text search fallback
    #[arg(long)]
    no_search: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env_overrides();
    if let Some(ref mode) = cli.mode {
        config.audit.mode =
            AuditMode::parse(mode).with_context(|| format!("unknown audit mode '{}'", mode))?;
    }
    if cli.no_search {
        config.crosscheck.search_enabled = false;
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );
    tracing::info!("finaudit v{}", env!("CARGO_PKG_VERSION"));

    config.validate().context("invalid configuration")?;

    let dossier = tokio::fs::read_to_string(&cli.dossier)
        .await
        .with_context(|| format!("Failed to read dossier {}", cli.dossier.display()))?;

    let partial: Option<FinancialRecord> = match cli.partial {
        Some(ref path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read partial record {}", path.display()))?;
            Some(serde_json::from_str(&content).context("Failed to parse partial record")?)
        }
        None => None,
    };

    if config.llm_api_key().is_none() {
        tracing::warn!(env = %config.llm.api_key_env, "No API key set, calling the LLM endpoint unauthenticated");
    }
    let bridge = Arc::new(ChatCompletionBridge::new(ChatBridgeConfig::from(&config))?);
    let capability: Arc<dyn TextUnderstanding> = bridge.clone();
    let search: Arc<dyn FreeTextSearch> = bridge;
    let pipeline = Pipeline::from_config(&config, capability, Some(search))?;

    let (record, trail) = pipeline
        .run_with_partial(&cli.subject, &dossier, partial.as_ref())
        .await?;

    let output = serde_json::json!({
        "record": record,
        "audit_trail": trail,
    });
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", rendered);

    Ok(())
}
