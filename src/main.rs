//! aquifer-md — gap-aware market data ingestion and durability core.
//!
//! This binary is a thin bootstrap: CLI parsing and config-file loading are
//! explicitly out of scope for the core (§1), so this is the minimal
//! argv-to-`CoreOptions` translation a real deployment's config layer would
//! otherwise own, plus the run/backfill/replay dispatch named in §6.

use std::path::PathBuf;

use aquifer_md::config::{Command, CoreOptions, LogConfig};
use aquifer_md::logging;

fn parse_options() -> CoreOptions {
    let mut options = CoreOptions::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--data-root" => {
                if let Some(value) = args.next() {
                    options.data_root = PathBuf::from(&value);
                    options.sink.data_root = options.data_root.clone();
                    options.wal.wal_dir = options.data_root.join("_wal");
                    options.dedup.ledger_path = options.data_root.join("_dedup/ledger.log");
                }
            }
            "--symbol" => {
                if let Some(value) = args.next() {
                    options.symbols.push(value);
                }
            }
            "--backfill" => options.command = Command::Backfill,
            "--replay" => {
                if let Some(value) = args.next() {
                    options.command = Command::Replay { replay_path: PathBuf::from(value) };
                }
            }
            _ => {}
        }
    }
    options
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = parse_options();
    let _guard = logging::init_logging(&LogConfig {
        log_dir: options.data_root.join("_logs"),
        ..LogConfig::default()
    });

    tracing::info!(target: "ingest", git_hash = env!("GIT_HASH"), "aquifer-md starting");

    let core = aquifer_md::composition::run(options.clone()).await?;

    match &options.command {
        Command::Run => {
            tracing::info!(target: "ingest", "core running; press Ctrl+C to shut down");
            tokio::signal::ctrl_c().await?;
            tracing::info!(target: "ingest", "shutdown signal received");
        }
        Command::Backfill => {
            let symbols = options
                .normalized_symbols()
                .into_iter()
                .map(aquifer_md::Symbol::new)
                .collect();
            let today = chrono::Utc::now().date_naive();
            let from = today - chrono::Duration::days(5);
            let job = core
                .run_backfill("cli-backfill", symbols, from, today, None)
                .await?;
            tracing::info!(target: "ingest", state = ?job.state, "backfill job finished");
        }
        Command::Replay { replay_path } => {
            let publisher = core.publisher();
            let summary = aquifer_md::replay::replay_file(replay_path, publisher.as_ref())?;
            tracing::info!(target: "ingest", read = summary.read, published = summary.published, "replay finished");
        }
    }

    core.write_status()?;
    core.shutdown().await?;
    Ok(())
}
