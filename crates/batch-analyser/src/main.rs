//! Batch Analyser - Incremental Stockfish analysis of recorded games.
//!
//! Games produced by an external importer are merged into the data
//! directory's store, then analysed depth by depth. Progress survives
//! restarts: an interrupted run picks up where it stopped.

use anyhow::Context;
use chess_analysis::store::read_games;
use chess_analysis::{
    AnalyserConfig, EngineSession, JsonReport, ReportSink, RunOutcome, Scheduler, Store,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;

const STORE_FILE: &str = "data.json";
const REPORT_FILE: &str = "analysis.json";

#[derive(Parser)]
#[command(name = "batch-analyser")]
#[command(about = "Analyse recorded chess games with Stockfish, depth by depth")]
struct Cli {
    /// Directory holding analyser.toml, the store and the report
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge games from a JSON file produced by the importer
    Import {
        /// JSON array of games
        games: PathBuf,
    },
    /// Analyse every position missing a depth of the ladder
    Analyse,
    /// Rewrite the review report from the stored results
    Report,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = AnalyserConfig::load(&cli.data_dir).with_context(|| {
        format!(
            "Failed to load {}",
            AnalyserConfig::config_path(&cli.data_dir).display()
        )
    })?;

    match cli.command {
        Commands::Import { games } => import(&cli.data_dir, &config, &games),
        Commands::Analyse => analyse(&cli.data_dir, config).await,
        Commands::Report => report(&cli.data_dir),
    }
}

fn import(data_dir: &Path, config: &AnalyserConfig, games_path: &Path) -> anyhow::Result<()> {
    let mut store = Store::open(data_dir.join(STORE_FILE))?;
    let games = read_games(games_path)?;
    let total = games.len();

    let accepted: Vec<_> = games
        .into_iter()
        .filter(|g| {
            config
                .analysis
                .accepts_time_control(g.prop("TimeControl"))
        })
        .collect();
    let skipped = total - accepted.len();

    let summary = store.merge(accepted);
    store.save()?;

    tracing::info!(
        added = summary.added,
        updated = summary.updated,
        skipped,
        "Imported games from {}",
        games_path.display()
    );
    Ok(())
}

async fn analyse(data_dir: &Path, config: AnalyserConfig) -> anyhow::Result<()> {
    let store = Store::open(data_dir.join(STORE_FILE))?;
    tracing::info!("Store: {} games", store.len());
    tracing::info!("Engine: {}", config.engine.path.display());
    tracing::info!("Depths: {:?}", config.analysis.depths);

    // Stop flag, checked by the scheduler before every position
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, finishing current position");
            stop_clone.store(true, Ordering::SeqCst);
        }
    });

    let report = JsonReport::new(data_dir.join(REPORT_FILE));
    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<RunOutcome> {
        let mut store = store;
        let engine = EngineSession::start_with_retry(&config.engine)?;
        tracing::info!("Engine: {}", engine.name());

        let mut scheduler =
            Scheduler::new(engine, report, &config.analysis)?.with_stop_flag(stop);
        match scheduler.run(&mut store) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Keep whatever was analysed since the last checkpoint
                if let Err(save_err) = store.save() {
                    tracing::error!("Failed to save progress: {}", save_err);
                }
                Err(e.into())
            }
        }
    })
    .await??;

    match outcome {
        RunOutcome::Completed { analysed } => {
            tracing::info!(analysed, "Analysis complete");
        }
        RunOutcome::Interrupted { analysed } => {
            tracing::info!(analysed, "Analysis interrupted, progress saved");
        }
    }
    Ok(())
}

fn report(data_dir: &Path) -> anyhow::Result<()> {
    let store = Store::open(data_dir.join(STORE_FILE))?;
    let mut report = JsonReport::new(data_dir.join(REPORT_FILE));
    report.regenerate(&store)?;
    Ok(())
}
