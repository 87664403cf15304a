//! Incremental Stockfish analysis of recorded chess games.
//!
//! Games are analysed over a ladder of search depths. Results are cached per
//! position and depth, so a run can be interrupted and resumed without
//! repeating engine work, and each played move is classified against the
//! engine's best lines.
//!
//! # Overview
//!
//! - [`EngineSession`] - One UCI engine process answering multi-line searches
//! - [`Evaluation`] - One engine line (centipawn or mate score) at one depth
//! - [`Store`] - Games, positions and their evaluations, persisted as JSON
//! - [`Scheduler`] - Works through the depth ladder, checkpointing as it goes
//! - [`classify`] - Mate-aware move quality verdicts
//! - [`JsonReport`] - Per-game review snapshots for rendering
//!
//! # Example
//!
//! ```ignore
//! use chess_analysis::{AnalyserConfig, EngineSession, JsonReport, Scheduler, Store};
//!
//! let config = AnalyserConfig::load(data_dir)?;
//! let mut store = Store::open(data_dir.join("data.json"))?;
//! let engine = EngineSession::start_with_retry(&config.engine)?;
//! let report = JsonReport::new(data_dir.join("analysis.json"));
//! let mut scheduler = Scheduler::new(engine, report, &config.analysis)?;
//! scheduler.run(&mut store)?;
//! ```

pub mod config;
pub mod engine;
pub mod evaluation;
pub mod notation;
pub mod quality;
pub mod review;
pub mod scheduler;
pub mod store;

pub use config::{AnalyserConfig, AnalysisSettings, ConfigError, DepthLadder, EngineConfig};
pub use engine::{EngineError, EngineSession, Evaluator, SearchCollector, SessionState};
pub use evaluation::{Evaluation, EvaluationError, Score};
pub use quality::{classify, DiffDisplay, MoveVerdict, Severity};
pub use review::{GameReview, JsonReport, MoveReview, ReportError, ReportSink, Review};
pub use scheduler::{RunOutcome, Scheduler, SchedulerError};
pub use store::{Game, MergeSummary, Position, PositionRef, Store, StoreError};
