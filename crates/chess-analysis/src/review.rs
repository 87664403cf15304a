//! Per-game review snapshots.
//!
//! A review lists every move of a game with the evaluation before it, its
//! verdict and how the engine ranked it, all at the deepest depth the whole
//! game has been analysed to. The snapshot is written as JSON for whatever
//! renders it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::evaluation::Evaluation;
use crate::notation;
use crate::quality::{self, MoveVerdict};
use crate::store::{self, Game, Position, Store, StoreError};

/// Plain move differences at or below this are left out of the medians.
const MEDIAN_FLOOR: i32 = -1500;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Write(#[from] StoreError),
}

/// Receives the store whenever the report should be brought up to date.
pub trait ReportSink {
    fn regenerate(&mut self, store: &Store) -> Result<(), ReportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

/// How a game ended, when the last position does not show it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ending {
    /// The side to move in the final position resigned.
    Resigned,
    OpponentResigned,
    OutOfTime,
    Stalemate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveReview {
    pub full_move_number: u32,
    pub side: Side,
    /// SAN of the move played.
    pub played: String,
    /// Normalized evaluation before the move, from White's point of view.
    pub white_eval: i32,
    /// Absent when the move ended the game.
    pub verdict: Option<MoveVerdict>,
    /// 1-based position of the played move among the engine's lines.
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameReview {
    pub hash: String,
    pub started_at: Option<DateTime<Utc>>,
    pub white: Option<String>,
    pub black: Option<String>,
    pub white_elo: Option<String>,
    pub black_elo: Option<String>,
    pub link: Option<String>,
    pub depth: u32,
    pub moves: Vec<MoveReview>,
    /// Evaluation of the final position from White's point of view; absent
    /// after checkmate.
    pub final_eval: Option<i32>,
    pub ending: Option<Ending>,
    /// Median centipawn change per move for each side.
    pub white_median: Option<i32>,
    pub black_median: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct Review {
    pub generated_at: DateTime<Utc>,
    pub games: Vec<GameReview>,
}

/// Reviews of every fully evaluated game, in start-time order.
pub fn build_review(store: &Store) -> Review {
    let games: Vec<GameReview> = store
        .games_in_order()
        .into_iter()
        .filter_map(review_game)
        .collect();
    Review {
        generated_at: Utc::now(),
        games,
    }
}

/// Review of one game, or `None` while some position lacks an evaluation
/// at the review depth.
pub fn review_game(game: &Game) -> Option<GameReview> {
    let depth = game.review_depth()?;
    let best: Option<Vec<&Evaluation>> = game.positions.iter().map(|p| p.best_at(depth)).collect();
    let Some(best) = best else {
        debug!(game = %game.hash, depth, "Skipping review: depth missing on some positions");
        return None;
    };

    let mut moves = Vec::new();
    let mut white_diffs = Vec::new();
    let mut black_diffs = Vec::new();

    for (p, pos) in game.positions.iter().enumerate() {
        let (Some(played), Some(reply)) = (&pos.move_taken, best.get(p + 1)) else {
            continue;
        };
        let before = best[p];

        let diff = -reply.normalized_value() - before.normalized_value();
        if pos.is_black_to_move {
            black_diffs.push(diff);
        } else {
            white_diffs.push(diff);
        }

        moves.push(MoveReview {
            full_move_number: pos.full_move_number,
            side: side_to_move(pos),
            played: played.clone(),
            white_eval: white_view(pos, before.normalized_value()),
            verdict: quality::classify(before, reply),
            rank: move_rank(pos, depth),
        });
    }

    let last = game.positions.last()?;
    let final_eval = best
        .last()
        .filter(|e| !(e.is_mate() && e.raw() == 0))
        .map(|e| white_view(last, e.normalized_value()));

    Some(GameReview {
        hash: game.hash.clone(),
        started_at: game.started_at(),
        white: game.prop("White").map(str::to_string),
        black: game.prop("Black").map(str::to_string),
        white_elo: game.prop("WhiteElo").map(str::to_string),
        black_elo: game.prop("BlackElo").map(str::to_string),
        link: game.prop("Link").map(str::to_string),
        depth,
        moves,
        final_eval,
        ending: ending(game, last),
        white_median: median(white_diffs),
        black_median: median(black_diffs),
    })
}

/// Rank of the move actually played among the lines found at `depth`,
/// strongest first. `None` if the engine did not consider it.
pub fn move_rank(position: &Position, depth: u32) -> Option<usize> {
    let played = position.move_taken.as_deref()?;
    let mut lines: Vec<&Evaluation> = position.lines_at(depth).collect();
    lines.sort_by(|a, b| b.cmp_strength(a));
    lines
        .iter()
        .position(|e| e.mv.as_deref().is_some_and(|mv| notation::same_move(mv, played)))
        .map(|i| i + 1)
}

fn side_to_move(position: &Position) -> Side {
    if position.is_black_to_move {
        Side::Black
    } else {
        Side::White
    }
}

fn white_view(position: &Position, value: i32) -> i32 {
    if position.is_black_to_move {
        -value
    } else {
        value
    }
}

fn median(mut diffs: Vec<i32>) -> Option<i32> {
    diffs.retain(|&d| d > MEDIAN_FLOOR);
    diffs.sort_unstable();
    diffs.get(diffs.len() / 2).copied()
}

fn ending(game: &Game, last: &Position) -> Option<Ending> {
    let termination = game.prop("Termination")?;
    if termination.ends_with("won by resignation") {
        let loser_result = if last.is_black_to_move { "1-0" } else { "0-1" };
        Some(if game.prop("Result") == Some(loser_result) {
            Ending::Resigned
        } else {
            Ending::OpponentResigned
        })
    } else if termination.ends_with("won on time") {
        Some(Ending::OutOfTime)
    } else if termination.ends_with("drawn by stalemate") {
        Some(Ending::Stalemate)
    } else {
        None
    }
}

/// Writes the review of the whole store to a JSON file.
#[derive(Debug, Clone)]
pub struct JsonReport {
    path: PathBuf,
}

impl JsonReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonReport {
    fn regenerate(&mut self, store: &Store) -> Result<(), ReportError> {
        let review = build_review(store);
        store::write_json_atomic(&self.path, &review)?;
        info!(
            path = %self.path.display(),
            games = review.games.len(),
            "Report regenerated"
        );
        Ok(())
    }
}
