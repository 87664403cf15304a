//! Configuration file loading for the analyser.
//!
//! Settings live in `analyser.toml` inside the data directory. A missing file
//! is created with the defaults so it can be edited afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read or write the configuration file.
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse the configuration file as valid TOML.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// Failed to write the default configuration.
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// The depth ladder is empty or contains a zero depth.
    #[error("Invalid depth ladder: {0}")]
    InvalidLadder(String),
    /// At least one candidate line must be requested per search.
    #[error("Invalid line count: {0}, expected at least 1")]
    InvalidLines(u32),
}

/// How to launch and tune the analysis engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Path to the engine executable. Defaults to "stockfish" (looked up in PATH).
    #[serde(default = "default_engine_path")]
    pub path: PathBuf,
    /// Extra command line arguments for the engine.
    #[serde(default)]
    pub args: Vec<String>,
    /// Value for the `Threads` option.
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// Value for the `Hash` option, in megabytes.
    #[serde(default = "default_hash_mb")]
    pub hash_mb: u32,
    /// Value for the `Use NNUE` option.
    #[serde(default = "default_use_nnue")]
    pub use_nnue: bool,
    /// How long to wait for `uciok` / `readyok`.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Upper bound for a single search. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_timeout_secs: Option<u64>,
    /// How many times to try launching the engine before giving up.
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,
}

fn default_engine_path() -> PathBuf {
    PathBuf::from("stockfish")
}

fn default_threads() -> u32 {
    4
}

fn default_hash_mb() -> u32 {
    128
}

fn default_use_nnue() -> bool {
    true
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

fn default_start_attempts() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: default_engine_path(),
            args: Vec::new(),
            threads: default_threads(),
            hash_mb: default_hash_mb(),
            use_nnue: default_use_nnue(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            search_timeout_secs: None,
            start_attempts: default_start_attempts(),
        }
    }
}

impl EngineConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn search_timeout(&self) -> Option<Duration> {
        self.search_timeout_secs.map(Duration::from_secs)
    }
}

/// What to analyse and how often to persist progress.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnalysisSettings {
    /// Search depths to work through, shallowest first.
    #[serde(default = "default_depths")]
    pub depths: Vec<u32>,
    /// Number of candidate lines requested per search.
    #[serde(default = "default_lines")]
    pub lines: u32,
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    /// Only games with one of these `TimeControl` values are imported.
    /// Empty means every game.
    #[serde(default)]
    pub time_controls: Vec<String>,
}

// 10 is about 0.1 s per position, 20 about 3.5 s, 28 about 30 s.
fn default_depths() -> Vec<u32> {
    vec![10, 16, 20]
}

fn default_lines() -> u32 {
    5
}

fn default_checkpoint_interval_secs() -> u64 {
    30
}

fn default_report_interval_secs() -> u64 {
    300
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            depths: default_depths(),
            lines: default_lines(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            report_interval_secs: default_report_interval_secs(),
            time_controls: Vec::new(),
        }
    }
}

impl AnalysisSettings {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Validated depth ladder.
    pub fn ladder(&self) -> Result<DepthLadder, ConfigError> {
        DepthLadder::new(self.depths.clone())
    }

    /// Number of candidate lines per search, checked to be at least one.
    pub fn line_count(&self) -> Result<u32, ConfigError> {
        match self.lines {
            0 => Err(ConfigError::InvalidLines(0)),
            n => Ok(n),
        }
    }

    /// Whether a game with this time control should be imported.
    pub fn accepts_time_control(&self, time_control: Option<&str>) -> bool {
        self.time_controls.is_empty()
            || time_control.is_some_and(|tc| self.time_controls.iter().any(|t| t == tc))
    }
}

/// Main analyser configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct AnalyserConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

impl AnalyserConfig {
    pub const FILE_NAME: &'static str = "analyser.toml";

    /// Returns the path of the configuration file inside `data_dir`.
    pub fn config_path(data_dir: &Path) -> PathBuf {
        data_dir.join(Self::FILE_NAME)
    }

    /// Loads the configuration from `data_dir`.
    ///
    /// If the file does not exist, the defaults are written to it and returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read or created,
    /// or [`ConfigError::Parse`] if it contains invalid TOML.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::config_path(data_dir);
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            std::fs::create_dir_all(data_dir)?;
            std::fs::write(&path, toml::to_string_pretty(&config)?)?;
            Ok(config)
        }
    }
}

/// Strictly increasing, non-empty list of search depths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthLadder(Vec<u32>);

impl DepthLadder {
    /// Sorts and de-duplicates `depths`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidLadder`] for an empty list or a zero depth.
    pub fn new(mut depths: Vec<u32>) -> Result<Self, ConfigError> {
        if depths.is_empty() {
            return Err(ConfigError::InvalidLadder("no depths configured".to_string()));
        }
        if depths.contains(&0) {
            return Err(ConfigError::InvalidLadder("depth 0 is not a search".to_string()));
        }
        depths.sort_unstable();
        depths.dedup();
        Ok(Self(depths))
    }

    pub fn depths(&self) -> &[u32] {
        &self.0
    }

    /// The shallowest depth; its results are considered provisional.
    pub fn shallowest(&self) -> u32 {
        self.0[0]
    }

    pub fn deepest(&self) -> u32 {
        self.0[self.0.len() - 1]
    }
}
