//! stationary: cross-match every exposure chip overlapping the given
//! HEALPix pixels and fold its sources into the pixel shards.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;

use celestial_stationary::{
    run_batch, ExposureIndex, FileStore, MatchOrchestrator, RunOptions, StationaryConfig,
};

#[derive(Parser)]
#[command(name = "stationary")]
#[command(about = "Count repeat detections of survey sources across epochs")]
#[command(version)]
struct Cli {
    /// HEALPix pixels (nested, at the configured order) to process
    #[arg(required = true)]
    pixels: Vec<u64>,

    /// Root directory of the catalog, shard and status stores
    #[arg(long)]
    dbimages: Option<PathBuf>,

    /// Configuration file (defaults to ./stationary.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do the computation but write no catalogs or shards (implies --force).
    /// Tasks are still marked successful, so a later real run needs --force
    #[arg(long)]
    dry_run: bool,

    /// Re-run chips that already succeeded
    #[arg(long)]
    force: bool,

    /// Log progress
    #[arg(short, long)]
    verbose: bool,

    /// Log per-pixel and per-candidate detail
    #[arg(short, long)]
    debug: bool,
}

fn init_tracing(verbose: bool, debug: bool) -> anyhow::Result<()> {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("STATIONARY_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let config = StationaryConfig::load(cli.config.as_deref(), cli.dbimages.as_deref())
        .context("Failed to load configuration")?;
    let store = FileStore::new(&config.storage_root)
        .with_lock_timing(config.lock_wait(), config.stale_lock_after());
    let index = ExposureIndex::load(&store).with_context(|| {
        format!(
            "Failed to load exposure index under {}",
            config.storage_root.display()
        )
    })?;

    let orchestrator = MatchOrchestrator::new(&config, &store, &index)?;
    let options = RunOptions {
        dry_run: cli.dry_run,
        force: cli.force,
    };
    if options.dry_run {
        tracing::warn!(
            "dry run: tasks will be marked successful without writing results; \
             rerun with --force to persist"
        );
    }
    let summary = run_batch(&orchestrator, &cli.pixels, options)
        .context("Failed to select tasks for the requested pixels")?;

    for (chip, message) in &summary.failed {
        eprintln!("{chip}: {message}");
    }
    eprintln!(
        "{} completed, {} skipped, {} failed",
        summary.completed,
        summary.skipped,
        summary.failed.len()
    );
    Ok(summary.exit_code())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug)?;

    let code = run(&cli)?;
    process::exit(code);
}
