//! Durable store of games, their positions and the evaluations found so far.
//!
//! The whole store is one pretty-printed JSON document:
//!
//! ```json
//! {
//!   "games": {
//!     "Xb3k...": {
//!       "hash": "Xb3k...",
//!       "props": { "White": "alice", "UTCDate": "2024.03.01", ... },
//!       "positions": [
//!         {
//!           "fen": "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
//!           "move_taken": "e4",
//!           "is_black_to_move": false,
//!           "full_move_number": 1,
//!           "evaluations": [
//!             { "score": { "centipawns": 31 }, "move": "e4", "pv": ["e5"], "depth": 10, "rank": 1 }
//!           ]
//!         }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Saving rewrites the file through a temporary sibling and a rename, so a
//! crash mid-write leaves the previous checkpoint intact.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::evaluation::{self, Evaluation};

/// Errors that can occur when reading, writing or updating the store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid store data in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("No position {index} in game {hash}")]
    UnknownPosition { hash: String, index: usize },
    /// Evaluations at a depth the position already has.
    #[error("Position {index} of game {hash} already has depth {depth}")]
    DuplicateDepth {
        hash: String,
        index: usize,
        depth: u32,
    },
}

impl StoreError {
    fn io(path: &Path) -> impl '_ + FnOnce(std::io::Error) -> Self {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path) -> impl '_ + FnOnce(serde_json::Error) -> Self {
        move |source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One position of a game, before `move_taken` is played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub fen: String,
    /// SAN of the move played from here; `None` for the final position.
    pub move_taken: Option<String>,
    pub is_black_to_move: bool,
    pub full_move_number: u32,
    /// Every line found so far, across all depths.
    #[serde(default)]
    pub evaluations: Vec<Evaluation>,
}

impl Position {
    pub fn has_depth(&self, depth: u32) -> bool {
        self.evaluations.iter().any(|e| e.depth == depth)
    }

    /// All lines found at `depth`, in engine order.
    pub fn lines_at(&self, depth: u32) -> impl Iterator<Item = &Evaluation> {
        self.evaluations.iter().filter(move |e| e.depth == depth)
    }

    /// The evaluation of this position at `depth`.
    pub fn best_at(&self, depth: u32) -> Option<&Evaluation> {
        evaluation::strongest(self.lines_at(depth))
    }

    pub fn deepest_depth(&self) -> Option<u32> {
        self.evaluations.iter().map(|e| e.depth).max()
    }
}

/// A recorded game as produced by the importer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Identity of the game, computed by the importer.
    pub hash: String,
    /// Free-form PGN-style headers (`White`, `TimeControl`, `UTCDate`, ...).
    #[serde(default)]
    pub props: BTreeMap<String, String>,
    pub positions: Vec<Position>,
}

impl Game {
    pub fn prop(&self, name: &str) -> Option<&str> {
        self.props.get(name).map(String::as_str)
    }

    /// Start of the game from the `UTCDate` (`YYYY.MM.DD`) and `UTCTime`
    /// (`HH:MM:SS`) headers. `None` if either is missing or malformed.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        let date = NaiveDate::parse_from_str(self.prop("UTCDate")?, "%Y.%m.%d").ok()?;
        let time = NaiveTime::parse_from_str(self.prop("UTCTime")?, "%H:%M:%S").ok()?;
        Some(date.and_time(time).and_utc())
    }

    /// Deepest depth every position has been evaluated at: the smallest of
    /// the per-position deepest depths. `None` while any position has no
    /// evaluation at all.
    pub fn review_depth(&self) -> Option<u32> {
        self.positions
            .iter()
            .map(Position::deepest_depth)
            .try_fold(u32::MAX, |min, d| d.map(|d| min.min(d)))
            .filter(|_| !self.positions.is_empty())
    }
}

/// Address of a position inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRef {
    pub hash: String,
    pub index: usize,
}

/// Outcome of [`Store::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub updated: usize,
}

#[derive(Deserialize)]
struct StoreFile {
    games: BTreeMap<String, Game>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    games: &'a BTreeMap<String, Game>,
}

/// All games known to the analyser, backed by one JSON file.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    games: BTreeMap<String, Game>,
}

impl Store {
    /// Load the store at `path`, or start an empty one if the file does not
    /// exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let games = if path.exists() {
            let content = fs::read_to_string(&path).map_err(StoreError::io(&path))?;
            let file: StoreFile = serde_json::from_str(&content).map_err(StoreError::json(&path))?;
            file.games
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), games = games.len(), "Store loaded");
        Ok(Self { path, games })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the whole store atomically.
    pub fn save(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &StoreFileRef { games: &self.games })?;
        debug!(path = %self.path.display(), games = self.games.len(), "Store saved");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    pub fn game(&self, hash: &str) -> Option<&Game> {
        self.games.get(hash)
    }

    /// Games ordered by start time, then hash.
    pub fn games_in_order(&self) -> Vec<&Game> {
        let mut games: Vec<&Game> = self.games.values().collect();
        games.sort_by(|a, b| {
            a.started_at()
                .cmp(&b.started_at())
                .then_with(|| a.hash.cmp(&b.hash))
        });
        games
    }

    /// Add imported games. Known games only get their headers refreshed;
    /// their positions and evaluations are left alone.
    pub fn merge(&mut self, games: impl IntoIterator<Item = Game>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for game in games {
            match self.games.get_mut(&game.hash) {
                Some(existing) => {
                    existing.props.extend(game.props);
                    summary.updated += 1;
                }
                None => {
                    self.games.insert(game.hash.clone(), game);
                    summary.added += 1;
                }
            }
        }
        summary
    }

    /// Positions with no evaluation at `depth`, games in start-time order and
    /// positions in game order.
    pub fn missing_depth(&self, depth: u32) -> Vec<PositionRef> {
        self.games_in_order()
            .into_iter()
            .flat_map(|game| {
                game.positions
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| !p.has_depth(depth))
                    .map(|(index, _)| PositionRef {
                        hash: game.hash.clone(),
                        index,
                    })
            })
            .collect()
    }

    pub fn position(&self, at: &PositionRef) -> Result<&Position, StoreError> {
        self.games
            .get(&at.hash)
            .and_then(|g| g.positions.get(at.index))
            .ok_or_else(|| StoreError::UnknownPosition {
                hash: at.hash.clone(),
                index: at.index,
            })
    }

    /// Append the lines of one search. Rejects lines at a depth the position
    /// already has, leaving it unchanged.
    pub fn record(&mut self, at: &PositionRef, lines: Vec<Evaluation>) -> Result<(), StoreError> {
        let position = self
            .games
            .get_mut(&at.hash)
            .and_then(|g| g.positions.get_mut(at.index))
            .ok_or_else(|| StoreError::UnknownPosition {
                hash: at.hash.clone(),
                index: at.index,
            })?;

        if let Some(line) = lines.iter().find(|l| position.has_depth(l.depth)) {
            return Err(StoreError::DuplicateDepth {
                hash: at.hash.clone(),
                index: at.index,
                depth: line.depth,
            });
        }
        position.evaluations.extend(lines);
        Ok(())
    }
}

/// Read the importer's output: a JSON array of games.
pub fn read_games(path: &Path) -> Result<Vec<Game>, StoreError> {
    let content = fs::read_to_string(path).map_err(StoreError::io(path))?;
    serde_json::from_str(&content).map_err(StoreError::json(path))
}

/// Write `value` as pretty JSON to `<path>.tmp`, sync it, then rename it
/// over `path`.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(StoreError::io(dir))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp).map_err(StoreError::io(&tmp))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(StoreError::json(&tmp))?;
    writer.flush().map_err(StoreError::io(&tmp))?;
    let file = writer
        .into_inner()
        .map_err(|e| StoreError::io(&tmp)(e.into_error()))?;
    file.sync_all().map_err(StoreError::io(&tmp))?;
    drop(file);

    fs::rename(&tmp, path).map_err(StoreError::io(path))
}
