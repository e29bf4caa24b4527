//! Tally reconciliation daemon.
//!
//! Runs a scheduler sweep at the configured poll interval until
//! interrupted. Each sweep is a complete, independent pass; state is
//! persisted per run, so stopping between sweeps loses nothing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use tally_core::{init_tracing, RunStore, TallyConfig};
use tally_engine::{ReconciliationScheduler, StabilityVerifier};
use tally_ledger::HttpLedgerClient;

#[derive(Parser)]
#[command(name = "tallyd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Usage reconciliation daemon", long_about = None)]
struct Args {
    /// Path to the engine config file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Directory containing persisted run records
    #[arg(long, default_value = ".tally/runs")]
    runs_dir: PathBuf,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json, Level::INFO);

    let config = TallyConfig::load(&args.config).context("Failed to load config")?;
    let store = RunStore::new(&args.runs_dir).context("Failed to open run store")?;
    let client =
        HttpLedgerClient::new(&config.ledger).context("Failed to construct ledger client")?;
    let verifier = StabilityVerifier::new(Arc::new(client), config.reconciliation, config.pricing);
    let scheduler = ReconciliationScheduler::new(store, verifier);

    let poll = Duration::from_secs(config.reconciliation.poll_interval_secs);
    info!(
        poll_interval_secs = config.reconciliation.poll_interval_secs,
        runs_dir = %args.runs_dir.display(),
        "tallyd started"
    );

    let mut ticker = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match scheduler.run_once().await {
                    Ok(results) => {
                        info!(swept = results.len(), "sweep finished");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "sweep failed; will retry next interval");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
