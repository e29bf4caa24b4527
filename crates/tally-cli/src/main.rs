//! Tally - usage reconciliation CLI
//!
//! The `tally` command reconciles persisted framework runs against the
//! external usage ledger.
//!
//! ## Commands
//!
//! - `sweep`: Run one reconciliation pass over all eligible runs
//! - `status`: Show reconciliation state for one run or the whole store
//! - `validate`: Check config and every stored run record, fail-fast

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::Level;

use tally_core::{init_tracing, RunStore, TallyConfig};
use tally_engine::{ReconciliationScheduler, StabilityVerifier};
use tally_ledger::HttpLedgerClient;

#[derive(Parser)]
#[command(name = "tally")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Usage reconciliation engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation sweep over all eligible runs
    Sweep {
        /// Path to the engine config file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory containing persisted run records
        #[arg(long, default_value = ".tally/runs")]
        runs_dir: PathBuf,
    },

    /// Show reconciliation status
    Status {
        /// Directory containing persisted run records
        #[arg(long, default_value = ".tally/runs")]
        runs_dir: PathBuf,

        /// Show one run (with full attempt history) instead of all
        #[arg(long)]
        run: Option<String>,
    },

    /// Validate config and every stored run record
    Validate {
        /// Path to the engine config file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory containing persisted run records
        #[arg(long, default_value = ".tally/runs")]
        runs_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Sweep { config, runs_dir } => cmd_sweep(&config, &runs_dir).await,
        Commands::Status { runs_dir, run } => cmd_status(&runs_dir, run.as_deref()),
        Commands::Validate { config, runs_dir } => cmd_validate(&config, &runs_dir),
    }
}

async fn cmd_sweep(config_path: &PathBuf, runs_dir: &PathBuf) -> Result<()> {
    let config = TallyConfig::load(config_path).context("Failed to load config")?;
    let store = RunStore::new(runs_dir).context("Failed to open run store")?;
    let client =
        HttpLedgerClient::new(&config.ledger).context("Failed to construct ledger client")?;
    let verifier = StabilityVerifier::new(Arc::new(client), config.reconciliation, config.pricing);
    let scheduler = ReconciliationScheduler::new(store, verifier);

    let results = scheduler
        .run_once()
        .await
        .context("Reconciliation sweep failed")?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn cmd_status(runs_dir: &PathBuf, run_id: Option<&str>) -> Result<()> {
    let store = RunStore::new(runs_dir).context("Failed to open run store")?;

    match run_id {
        Some(id) => {
            let run = store
                .load(id)
                .with_context(|| format!("Failed to load run {id}"))?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        None => {
            let mut runs = store.list().context("Failed to list runs")?;
            runs.sort_by_key(|r| r.start_timestamp);
            let summary: Vec<_> = runs
                .iter()
                .map(|r| {
                    json!({
                        "run_id": r.run_id,
                        "framework": r.framework,
                        "verification_status": r.status(),
                        "tokens_in": r.aggregate_metrics.tokens_in,
                        "tokens_out": r.aggregate_metrics.tokens_out,
                        "cost": r.aggregate_metrics.cost,
                        "attempts": r.usage_reconciliation.attempts.len(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

fn cmd_validate(config_path: &PathBuf, runs_dir: &PathBuf) -> Result<()> {
    let config = TallyConfig::load(config_path).context("Config validation failed")?;
    tracing::info!(
        frameworks = config.frameworks.len(),
        "config validated"
    );

    let store = RunStore::new(runs_dir).context("Failed to open run store")?;
    let runs = store.list().context("Failed to read run records")?;
    for run in &runs {
        tally_core::validate_record(run)
            .with_context(|| format!("Run record {} failed validation", run.run_id))?;
    }
    tracing::info!(runs = runs.len(), "all run records validated");
    println!("ok: {} framework(s), {} run record(s)", config.frameworks.len(), runs.len());
    Ok(())
}
