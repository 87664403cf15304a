//! Incremental analysis across the depth ladder.
//!
//! Every depth of the ladder is worked through in turn, shallowest first.
//! For each depth, only positions without results at that depth are sent to
//! the engine, so a run can be stopped at any point and resumed later
//! without repeating work. Progress is checkpointed to the store
//! periodically and the report is refreshed as deeper results arrive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{AnalysisSettings, ConfigError, DepthLadder};
use crate::engine::{EngineError, Evaluator};
use crate::evaluation::Evaluation;
use crate::review::{ReportError, ReportSink};
use crate::store::{PositionRef, Store, StoreError};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Report(#[from] ReportError),
    /// The engine's first line was not its strongest one.
    #[error("First line is not the strongest for position {index} of game {hash} at depth {depth}")]
    InconsistentOrdering {
        hash: String,
        index: usize,
        depth: u32,
    },
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every position has results at every depth of the ladder.
    Completed { analysed: usize },
    /// The stop flag was raised; progress up to that point is saved.
    Interrupted { analysed: usize },
}

/// Drives an [`Evaluator`] over the store, depth by depth.
pub struct Scheduler<E, R> {
    evaluator: E,
    report: R,
    ladder: DepthLadder,
    lines: u32,
    checkpoint_interval: Duration,
    report_interval: Duration,
    stop: Option<Arc<AtomicBool>>,
}

impl<E: Evaluator, R: ReportSink> Scheduler<E, R> {
    pub fn new(evaluator: E, report: R, settings: &AnalysisSettings) -> Result<Self, SchedulerError> {
        Ok(Self {
            evaluator,
            report,
            ladder: settings.ladder()?,
            lines: settings.line_count()?,
            checkpoint_interval: settings.checkpoint_interval(),
            report_interval: settings.report_interval(),
            stop: None,
        })
    }

    /// Check `flag` before every position and stop early once it is set.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn report(&self) -> &R {
        &self.report
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Analyse everything the store is missing.
    ///
    /// # Errors
    ///
    /// Any engine, store or report failure aborts the run. Results recorded
    /// since the last checkpoint are only in memory at that point; the
    /// caller decides whether to save them.
    pub fn run(&mut self, store: &mut Store) -> Result<RunOutcome, SchedulerError> {
        let shallowest = self.ladder.shallowest();
        let depths = self.ladder.depths().to_vec();
        let mut analysed = 0;
        let mut last_checkpoint = Instant::now();
        let mut last_report = Instant::now();

        for depth in depths {
            let pending = store.missing_depth(depth);
            if pending.is_empty() {
                debug!(depth, "Nothing to analyse at this depth");
                continue;
            }
            info!(depth, positions = pending.len(), "Starting depth");

            if depth != shallowest {
                self.report.regenerate(store)?;
                last_report = Instant::now();
            }

            for at in &pending {
                if self.stop_requested() {
                    info!(analysed, "Stop requested, saving progress");
                    store.save()?;
                    return Ok(RunOutcome::Interrupted { analysed });
                }

                self.analyse_position(store, at, depth)?;
                analysed += 1;

                if last_checkpoint.elapsed() >= self.checkpoint_interval {
                    store.save()?;
                    last_checkpoint = Instant::now();
                }
                if depth != shallowest && last_report.elapsed() >= self.report_interval {
                    self.report.regenerate(store)?;
                    last_report = Instant::now();
                }
            }

            store.save()?;
            last_checkpoint = Instant::now();
            last_report = Instant::now();
            info!(depth, "Depth complete");
        }

        self.report.regenerate(store)?;
        Ok(RunOutcome::Completed { analysed })
    }

    fn analyse_position(
        &mut self,
        store: &mut Store,
        at: &PositionRef,
        depth: u32,
    ) -> Result<(), SchedulerError> {
        let position = store.position(at)?;
        let label = format!(
            "{}{}",
            position.full_move_number,
            if position.is_black_to_move { "B" } else { "W" }
        );
        let fen = position.fen.clone();

        let start = Instant::now();
        let lines = self.evaluator.evaluate(&fen, depth, self.lines)?;
        info!(
            game = %at.hash,
            position = %label,
            depth,
            secs = %format!("{:.1}", start.elapsed().as_secs_f64()),
            "Analysed position"
        );

        if !first_is_strongest(&lines) {
            return Err(SchedulerError::InconsistentOrdering {
                hash: at.hash.clone(),
                index: at.index,
                depth,
            });
        }
        store.record(at, lines)?;
        Ok(())
    }
}

fn first_is_strongest(lines: &[Evaluation]) -> bool {
    match lines.first() {
        Some(first) => lines
            .iter()
            .all(|l| l.normalized_value() <= first.normalized_value()),
        None => false,
    }
}
