//! Stockfish engine session for multi-line position analysis.
//!
//! An [`EngineSession`] owns one engine process. Two reader threads drain the
//! process's stdout and stderr line by line into channels, so the session can
//! wait for output with a deadline instead of blocking on the pipe.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use shakmaty::Chess;
use thiserror::Error;
use tracing::{debug, info, warn};
use uci::{EngineInfo, EngineMessage, GuiCommand};

use crate::config::EngineConfig;
use crate::evaluation::{Evaluation, EvaluationError, Score};
use crate::notation::{self, NotationError, Terminal};

/// Errors that can occur when working with the analysis engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to spawn the engine process.
    #[error("Failed to spawn engine '{path}': {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Reading from or writing to the engine failed.
    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The engine closed its output.
    #[error("Engine exited unexpectedly")]
    Exited,
    /// The engine did not finish the handshake in time.
    #[error("Timed out after {after:?} waiting for {waiting_for}")]
    HandshakeTimeout {
        waiting_for: &'static str,
        after: Duration,
    },
    /// A search did not report `bestmove` in time.
    #[error("Search did not finish within {after:?}")]
    SearchTimeout { after: Duration },
    /// An operation was attempted in the wrong session state.
    #[error("Engine session is {0:?}, expected Ready")]
    NotReady(SessionState),
    /// The engine broke the output contract.
    #[error("Protocol violation: {0}")]
    Protocol(String),
    /// A search produced no line although the position has legal moves.
    #[error("No search results for non-terminal position {fen}")]
    NoResults { fen: String },
    #[error(transparent)]
    Notation(#[from] NotationError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

/// Anything that can produce multi-line evaluations of a position.
///
/// Implementations return the lines ordered by the engine's line index,
/// each tagged with the requested depth.
pub trait Evaluator {
    fn evaluate(
        &mut self,
        fen: &str,
        depth: u32,
        lines: u32,
    ) -> Result<Vec<Evaluation>, EngineError>;
}

/// Lifecycle of an [`EngineSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Handshaking,
    Ready,
    Searching,
    Stopped,
}

/// Latest completed report for one line index.
#[derive(Debug, Clone, PartialEq)]
struct ReportedLine {
    score: uci::Score,
    pv: Vec<String>,
}

/// Collects the output of a single `go depth` search.
///
/// Only `info` lines at exactly the requested depth are consulted; progress
/// lines (`currmove`) are skipped and later reports for a line index replace
/// earlier ones.
#[derive(Debug)]
pub struct SearchCollector {
    depth: u32,
    lines: u32,
    reports: BTreeMap<u32, ReportedLine>,
}

impl SearchCollector {
    pub fn new(depth: u32, lines: u32) -> Self {
        Self {
            depth,
            lines,
            reports: BTreeMap::new(),
        }
    }

    /// Consume one output line. Returns `true` once the search has finished.
    pub fn feed(&mut self, line: &str) -> Result<bool, EngineError> {
        match EngineMessage::parse(line) {
            EngineMessage::BestMove { .. } => Ok(true),
            EngineMessage::Info(info) => {
                self.record(info, line)?;
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn record(&mut self, info: EngineInfo, line: &str) -> Result<(), EngineError> {
        if info.depth != Some(self.depth) || info.is_progress_only() {
            return Ok(());
        }

        let index = info.multipv.unwrap_or(1);
        if index == 0 || index > self.lines {
            return Err(EngineError::Protocol(format!(
                "line index {} outside 1..={}: {}",
                index, self.lines, line
            )));
        }
        let score = info
            .score
            .ok_or_else(|| EngineError::Protocol(format!("result without score: {}", line)))?;
        if info.pv.is_empty() {
            return Err(EngineError::Protocol(format!("result without moves: {}", line)));
        }

        self.reports.insert(index, ReportedLine { score, pv: info.pv });
        Ok(())
    }

    /// Turn the collected reports into evaluations for `board`.
    ///
    /// With no reports, the position must be checkmate or stalemate and a
    /// single terminal evaluation is produced.
    pub fn finish(self, fen: &str, board: &Chess) -> Result<Vec<Evaluation>, EngineError> {
        if self.reports.is_empty() {
            return match notation::terminal_state(board) {
                Some(Terminal::Checkmate) => Ok(vec![Evaluation::terminal(true, self.depth)]),
                Some(Terminal::Stalemate) => Ok(vec![Evaluation::terminal(false, self.depth)]),
                None => Err(EngineError::NoResults {
                    fen: fen.to_string(),
                }),
            };
        }

        self.reports
            .into_iter()
            .map(|(rank, reported)| {
                let score = Score::from_uci(reported.score)?;
                let mut san = notation::decode_line(board, &reported.pv);
                if san.is_empty() {
                    return Err(EngineError::Protocol(format!(
                        "first move {} of line {} is illegal in {}",
                        reported.pv[0], rank, fen
                    )));
                }
                let mv = san.remove(0);
                Ok(Evaluation {
                    score,
                    mv: Some(mv),
                    pv: san,
                    depth: self.depth,
                    rank,
                })
            })
            .collect()
    }
}

/// One running engine process speaking UCI.
pub struct EngineSession {
    /// The engine process handle.
    process: Child,
    /// Writer for sending commands to the engine.
    stdin: ChildStdin,
    /// Lines read from the engine's stdout, in order.
    stdout: Receiver<String>,
    /// Lines read from the engine's stderr, in order.
    stderr: Receiver<String>,
    state: SessionState,
    /// The engine's name (reported via UCI id).
    name: String,
    config: EngineConfig,
}

impl EngineSession {
    /// Launch the engine and perform the UCI handshake.
    ///
    /// Sends `uci` and waits for `uciok`, applies the configured options,
    /// then synchronizes with `isready` and discards anything still buffered.
    ///
    /// # Errors
    ///
    /// - `EngineError::Spawn` if the process cannot be started
    /// - `EngineError::HandshakeTimeout` if the handshake is not acknowledged in time
    /// - `EngineError::Exited` if the engine quits during the handshake
    pub fn start(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut command = Command::new(&config.path);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Separate process group so a terminal Ctrl-C reaches only the analyser
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let mut process = command
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: config.path.display().to_string(),
                source,
            })?;

        let (stdin, stdout, stderr) = match (
            process.stdin.take(),
            process.stdout.take(),
            process.stderr.take(),
        ) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = process.kill();
                let _ = process.wait();
                return Err(EngineError::Exited);
            }
        };

        let readers = spawn_reader("engine-stdout", stdout)
            .and_then(|out| spawn_reader("engine-stderr", stderr).map(|err| (out, err)));
        let (stdout, stderr) = match readers {
            Ok(readers) => readers,
            Err(e) => {
                let _ = process.kill();
                let _ = process.wait();
                return Err(e);
            }
        };

        let mut session = Self {
            stdout,
            stderr,
            process,
            stdin,
            state: SessionState::NotStarted,
            name: String::new(),
            config: config.clone(),
        };

        session.handshake()?;
        info!(engine = %session.name, "Engine ready");
        Ok(session)
    }

    /// [`start`](Self::start), retried with a doubling backoff up to
    /// `config.start_attempts` times.
    pub fn start_with_retry(config: &EngineConfig) -> Result<Self, EngineError> {
        let attempts = config.start_attempts.max(1);
        let mut backoff = Duration::from_secs(1);
        let mut attempt = 1;
        loop {
            match Self::start(config) {
                Ok(session) => return Ok(session),
                Err(e) if attempt < attempts => {
                    warn!(attempt, attempts, error = %e, "Engine start failed, retrying in {:?}", backoff);
                    thread::sleep(backoff);
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn handshake(&mut self) -> Result<(), EngineError> {
        self.state = SessionState::Handshaking;
        let deadline = Instant::now() + self.config.handshake_timeout();

        self.send(&GuiCommand::Uci)?;
        loop {
            match EngineMessage::parse(&self.handshake_line(deadline, "uciok")?) {
                EngineMessage::Id { name: Some(name), .. } => self.name = name,
                EngineMessage::UciOk => break,
                _ => {}
            }
        }
        if self.name.is_empty() {
            self.name = "Unknown Engine".to_string();
        }

        self.send(&GuiCommand::set_option("Threads", self.config.threads))?;
        self.send(&GuiCommand::set_option("Hash", self.config.hash_mb))?;
        self.send(&GuiCommand::set_option("Use NNUE", self.config.use_nnue))?;

        self.send(&GuiCommand::IsReady)?;
        while EngineMessage::parse(&self.handshake_line(deadline, "readyok")?)
            != EngineMessage::ReadyOk
        {}

        self.discard_output();
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Returns the engine's name as reported via UCI protocol.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Search `fen` to exactly `depth` with `lines` candidate lines.
    ///
    /// Any error leaves the session [`SessionState::Stopped`].
    pub fn analyse(
        &mut self,
        fen: &str,
        depth: u32,
        lines: u32,
    ) -> Result<Vec<Evaluation>, EngineError> {
        if self.state != SessionState::Ready {
            return Err(EngineError::NotReady(self.state));
        }
        let board = notation::board_from_fen(fen)?;

        self.state = SessionState::Searching;
        let result = self.run_search(fen, &board, depth, lines);
        self.log_stderr();
        self.state = if result.is_ok() {
            SessionState::Ready
        } else {
            SessionState::Stopped
        };
        result
    }

    fn run_search(
        &mut self,
        fen: &str,
        board: &Chess,
        depth: u32,
        lines: u32,
    ) -> Result<Vec<Evaluation>, EngineError> {
        self.send(&GuiCommand::set_option("MultiPV", lines))?;
        self.send(&GuiCommand::Position {
            fen: fen.to_string(),
        })?;
        self.send(&GuiCommand::GoDepth(depth))?;

        let timeout = self.config.search_timeout();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut collector = SearchCollector::new(depth, lines);
        loop {
            let line = match deadline {
                Some(deadline) => match self.next_line(deadline) {
                    Ok(line) => line,
                    Err(RecvTimeoutError::Timeout) => {
                        let _ = self.send(&GuiCommand::Stop);
                        return Err(EngineError::SearchTimeout {
                            after: timeout.unwrap_or_default(),
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => return Err(EngineError::Exited),
                },
                None => self
                    .stdout
                    .recv()
                    .map(|line| line.trim().to_string())
                    .map_err(|_| EngineError::Exited)?,
            };
            if collector.feed(&line)? {
                break;
            }
        }
        collector.finish(fen, board)
    }

    /// Send `quit` and wait for the process to exit.
    pub fn quit(mut self) -> Result<(), EngineError> {
        self.send(&GuiCommand::Quit)?;
        self.process.wait()?;
        self.state = SessionState::Stopped;
        Ok(())
    }

    /// Send a command to the engine.
    fn send(&mut self, command: &GuiCommand) -> Result<(), EngineError> {
        debug!(cmd = %command, "engine <");
        writeln!(self.stdin, "{}", command)?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Next stdout line, trimmed, waiting at most until `deadline`.
    fn next_line(&mut self, deadline: Instant) -> Result<String, RecvTimeoutError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.stdout
            .recv_timeout(remaining)
            .map(|line| line.trim().to_string())
    }

    fn handshake_line(
        &mut self,
        deadline: Instant,
        waiting_for: &'static str,
    ) -> Result<String, EngineError> {
        self.next_line(deadline).map_err(|e| match e {
            RecvTimeoutError::Timeout => EngineError::HandshakeTimeout {
                waiting_for,
                after: self.config.handshake_timeout(),
            },
            RecvTimeoutError::Disconnected => EngineError::Exited,
        })
    }

    fn discard_output(&mut self) {
        let discarded = self.stdout.try_iter().count();
        if discarded > 0 {
            debug!(discarded, "Discarded buffered engine output");
        }
        self.log_stderr();
    }

    fn log_stderr(&mut self) {
        for line in self.stderr.try_iter() {
            warn!(engine = %self.name, "stderr: {}", line);
        }
    }
}

impl Evaluator for EngineSession {
    fn evaluate(
        &mut self,
        fen: &str,
        depth: u32,
        lines: u32,
    ) -> Result<Vec<Evaluation>, EngineError> {
        self.analyse(fen, depth, lines)
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        // Best effort: ask politely, then make sure the process is gone
        let _ = self.send(&GuiCommand::Quit);
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Forward every line of `stream` into a channel from a dedicated thread.
fn spawn_reader<R>(name: &str, stream: R) -> Result<Receiver<String>, EngineError>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            for line in BufReader::new(stream).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uci::InfoBuilder;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn collect(depth: u32, lines: u32, output: &[String]) -> Result<Vec<Evaluation>, EngineError> {
        let mut collector = SearchCollector::new(depth, lines);
        for line in output {
            if collector.feed(line)? {
                break;
            }
        }
        let board = notation::board_from_fen(START).unwrap();
        collector.finish(START, &board)
    }

    #[test]
    fn test_collects_lines_at_requested_depth() {
        let output = vec![
            InfoBuilder::new().depth(9).multipv(1).score_cp(90).pv(&["d2d4"]).build().to_uci(),
            InfoBuilder::new().depth(10).currmove("e2e4").build().to_uci(),
            InfoBuilder::new().depth(10).multipv(2).score_cp(20).pv(&["d2d4", "d7d5"]).build().to_uci(),
            InfoBuilder::new().depth(10).multipv(1).score_cp(30).pv(&["e2e4", "e7e5"]).build().to_uci(),
            "bestmove e2e4 ponder e7e5".to_string(),
        ];

        let evals = collect(10, 5, &output).unwrap();
        assert_eq!(evals.len(), 2);
        assert_eq!(evals[0].rank, 1);
        assert_eq!(evals[0].mv.as_deref(), Some("e4"));
        assert_eq!(evals[0].pv, vec!["e5"]);
        assert_eq!(evals[0].score, Score::Centipawns(30));
        assert_eq!(evals[1].rank, 2);
        assert_eq!(evals[1].mv.as_deref(), Some("d4"));
        assert!(evals.iter().all(|e| e.depth == 10));
    }

    #[test]
    fn test_later_report_supersedes_earlier() {
        let output = vec![
            InfoBuilder::new().depth(10).multipv(1).score_cp(15).pv(&["g1f3"]).build().to_uci(),
            InfoBuilder::new().depth(10).multipv(1).score_mate(7).pv(&["e2e4"]).build().to_uci(),
            "bestmove e2e4".to_string(),
        ];

        let evals = collect(10, 1, &output).unwrap();
        assert_eq!(evals.len(), 1);
        assert_eq!(evals[0].score, Score::Mate(7));
        assert_eq!(evals[0].mv.as_deref(), Some("e4"));
    }

    #[test]
    fn test_output_after_bestmove_is_not_consumed() {
        let output = vec![
            InfoBuilder::new().depth(4).multipv(1).score_cp(15).pv(&["g1f3"]).build().to_uci(),
            "bestmove g1f3".to_string(),
            InfoBuilder::new().depth(4).multipv(1).score_cp(-500).pv(&["f2f3"]).build().to_uci(),
        ];

        let evals = collect(4, 1, &output).unwrap();
        assert_eq!(evals[0].mv.as_deref(), Some("Nf3"));
    }

    #[test]
    fn test_missing_multipv_defaults_to_first_line() {
        let output = vec![
            "info depth 6 score cp 12 nodes 1000 pv c2c4".to_string(),
            "bestmove c2c4".to_string(),
        ];
        let evals = collect(6, 5, &output).unwrap();
        assert_eq!(evals[0].rank, 1);
        assert_eq!(evals[0].mv.as_deref(), Some("c4"));
    }

    #[test]
    fn test_result_without_score_is_protocol_error() {
        let output = vec!["info depth 6 multipv 1 nodes 1000 pv c2c4".to_string()];
        assert!(matches!(collect(6, 5, &output), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn test_line_index_out_of_range_is_protocol_error() {
        let output =
            vec![InfoBuilder::new().depth(6).multipv(3).score_cp(0).pv(&["c2c4"]).build().to_uci()];
        assert!(matches!(collect(6, 2, &output), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn test_illegal_first_move_is_protocol_error() {
        let output = vec![
            InfoBuilder::new().depth(6).multipv(1).score_cp(0).pv(&["e2e5"]).build().to_uci(),
            "bestmove e2e5".to_string(),
        ];
        assert!(matches!(collect(6, 1, &output), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn test_out_of_range_mate_is_rejected() {
        let output = vec![
            InfoBuilder::new().depth(6).multipv(1).score_mate(120).pv(&["e2e4"]).build().to_uci(),
            "bestmove e2e4".to_string(),
        ];
        assert!(matches!(collect(6, 1, &output), Err(EngineError::Evaluation(_))));
    }

    #[test]
    fn test_illegal_continuation_truncates_pv() {
        let first = "e2e4";
        let continuation = [
            "e7e5", "g1f3", "b8c6", "f1c4", "g8f6", "d2d3", "f8c5", "c2c3", "d7d6",
            // the tenth continuation move: no white piece on h5
            "h5h6", "a7a6",
        ];
        let pv: Vec<&str> = std::iter::once(first).chain(continuation).collect();
        let output = vec![
            InfoBuilder::new().depth(30).multipv(1).score_cp(25).pv(&pv).build().to_uci(),
            "bestmove e2e4".to_string(),
        ];

        let evals = collect(30, 1, &output).unwrap();
        assert_eq!(evals[0].mv.as_deref(), Some("e4"));
        assert_eq!(evals[0].pv.len(), 9);
        assert_eq!(evals[0].pv[8], "d6");
        assert_eq!(evals[0].score, Score::Centipawns(25));
    }

    fn finish_terminal(fen: &str) -> Result<Vec<Evaluation>, EngineError> {
        let mut collector = SearchCollector::new(16, 5);
        collector.feed("info depth 0 score mate 0").unwrap();
        assert!(collector.feed("bestmove (none)").unwrap());
        let board = notation::board_from_fen(fen).unwrap();
        collector.finish(fen, &board)
    }

    #[test]
    fn test_checkmate_synthesizes_lost_evaluation() {
        let evals = finish_terminal("k5R1/7R/8/8/8/8/8/K7 b - - 3 2").unwrap();
        assert_eq!(evals, vec![Evaluation::terminal(true, 16)]);
        assert!(evals[0].is_mate());
        assert_eq!(evals[0].raw(), 0);
        assert_eq!(evals[0].mv, None);
    }

    #[test]
    fn test_stalemate_synthesizes_draw_evaluation() {
        let evals = finish_terminal("k7/5R2/8/8/1R6/8/8/K7 b - - 0 1").unwrap();
        assert_eq!(evals.len(), 1);
        assert!(!evals[0].is_mate());
        assert_eq!(evals[0].raw(), 0);
        assert_eq!(evals[0].mv, None);
    }

    #[test]
    fn test_no_results_for_playable_position_is_error() {
        match finish_terminal(START) {
            Err(EngineError::NoResults { fen }) => assert_eq!(fen, START),
            other => panic!("Expected NoResults, got {:?}", other),
        }
    }

    #[test]
    fn test_spawn_nonexistent_engine() {
        let config = EngineConfig {
            path: "/nonexistent/path/to/stockfish".into(),
            ..EngineConfig::default()
        };
        match EngineSession::start(&config) {
            Err(EngineError::Spawn { path, .. }) => {
                assert_eq!(path, "/nonexistent/path/to/stockfish");
            }
            Err(e) => panic!("Expected Spawn error, got {}", e),
            Ok(_) => panic!("Expected Spawn error"),
        }
    }

    #[test]
    fn test_start_with_retry_returns_last_error() {
        let config = EngineConfig {
            path: "/nonexistent/path/to/stockfish".into(),
            start_attempts: 2,
            ..EngineConfig::default()
        };
        let started = Instant::now();
        let result = EngineSession::start_with_retry(&config);
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(EngineError::Spawn { .. })));
        // One 1 s backoff between the two attempts, none after the last
        assert!(elapsed >= Duration::from_secs(1), "retried too fast: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "waited too long: {:?}", elapsed);
    }

    #[test]
    fn test_single_attempt_does_not_wait() {
        let config = EngineConfig {
            path: "/nonexistent/path/to/stockfish".into(),
            start_attempts: 0,
            ..EngineConfig::default()
        };
        let started = Instant::now();
        assert!(matches!(
            EngineSession::start_with_retry(&config),
            Err(EngineError::Spawn { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_engine_error_display() {
        let timeout = EngineError::HandshakeTimeout {
            waiting_for: "uciok",
            after: Duration::from_secs(1),
        };
        assert!(timeout.to_string().contains("uciok"));

        let not_ready = EngineError::NotReady(SessionState::Searching);
        assert_eq!(not_ready.to_string(), "Engine session is Searching, expected Ready");

        let no_results = EngineError::NoResults {
            fen: START.to_string(),
        };
        assert!(no_results.to_string().contains(START));
    }

    #[cfg(unix)]
    mod scripted {
        //! Sessions against small shell scripts standing in for an engine.

        use super::*;
        use std::path::Path;

        const FAKE_ENGINE: &str = r#"
while read -r cmd rest; do
  case "$cmd" in
    uci) echo "id name FakeFish 1.0"; echo "option name Hash type spin"; echo "uciok" ;;
    isready) echo "readyok" ;;
    go)
      echo "info depth 1 multipv 1 score cp 5 pv g1f3"
      echo "info depth 2 currmove e2e4 currmovenumber 1"
      echo "info depth 2 multipv 1 score cp 31 pv e2e4 e7e5 g1f3"
      echo "info depth 2 multipv 2 score cp 24 pv d2d4 d7d5"
      echo "bestmove e2e4 ponder e7e5" ;;
    quit) exit 0 ;;
  esac
done
"#;

        fn script_config(dir: &Path, body: &str) -> EngineConfig {
            let script = dir.join("engine.sh");
            std::fs::write(&script, body).unwrap();
            EngineConfig {
                path: "/bin/sh".into(),
                args: vec![script.display().to_string()],
                handshake_timeout_secs: 2,
                search_timeout_secs: Some(5),
                ..EngineConfig::default()
            }
        }

        #[test]
        fn test_session_handshake_and_search() {
            let dir = tempfile::tempdir().unwrap();
            let mut session = EngineSession::start(&script_config(dir.path(), FAKE_ENGINE)).unwrap();
            assert_eq!(session.name(), "FakeFish 1.0");
            assert_eq!(session.state(), SessionState::Ready);

            let evals = session.evaluate(START, 2, 5).unwrap();
            assert_eq!(evals.len(), 2);
            assert_eq!(evals[0].mv.as_deref(), Some("e4"));
            assert_eq!(evals[0].pv, vec!["e5", "Nf3"]);
            assert_eq!(evals[1].mv.as_deref(), Some("d4"));
            assert_eq!(session.state(), SessionState::Ready);

            // Sequential searches reuse the same process
            let again = session.evaluate(START, 2, 5).unwrap();
            assert_eq!(again, evals);

            session.quit().unwrap();
        }

        /// Process group id, the fifth field of `/proc/<pid>/stat`.
        #[cfg(target_os = "linux")]
        fn process_group_of(pid: &str) -> i32 {
            let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap();
            // The command name may contain spaces; fields resume after its ')'
            let after_name = &stat[stat.rfind(')').unwrap() + 2..];
            after_name.split_whitespace().nth(2).unwrap().parse().unwrap()
        }

        #[cfg(target_os = "linux")]
        #[test]
        fn test_engine_runs_in_its_own_process_group() {
            let dir = tempfile::tempdir().unwrap();
            let session = EngineSession::start(&script_config(dir.path(), FAKE_ENGINE)).unwrap();

            let engine_pid = session.process.id();
            let engine_group = process_group_of(&engine_pid.to_string());
            assert_eq!(engine_group, engine_pid as i32);
            assert_ne!(engine_group, process_group_of("self"));

            session.quit().unwrap();
        }

        #[test]
        fn test_handshake_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let silent = "while read -r cmd rest; do :; done\n";
            match EngineSession::start(&script_config(dir.path(), silent)) {
                Err(EngineError::HandshakeTimeout { waiting_for, .. }) => {
                    assert_eq!(waiting_for, "uciok")
                }
                Err(e) => panic!("Expected Timeout, got {}", e),
                Ok(_) => panic!("Expected Timeout"),
            }
        }

        #[test]
        fn test_search_timeout_stops_session() {
            let dir = tempfile::tempdir().unwrap();
            let stalling = r#"
while read -r cmd rest; do
  case "$cmd" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go) echo "info depth 1 currmove e2e4 currmovenumber 1" ;;
    quit) exit 0 ;;
  esac
done
"#;
            let config = EngineConfig {
                search_timeout_secs: Some(1),
                ..script_config(dir.path(), stalling)
            };
            let mut session = EngineSession::start(&config).unwrap();
            assert!(matches!(
                session.evaluate(START, 2, 5),
                Err(EngineError::SearchTimeout { .. })
            ));
            assert_eq!(session.state(), SessionState::Stopped);
        }

        #[test]
        fn test_engine_exit_during_search() {
            let dir = tempfile::tempdir().unwrap();
            let crashing = r#"
while read -r cmd rest; do
  case "$cmd" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go) exit 1 ;;
  esac
done
"#;
            let mut session = EngineSession::start(&script_config(dir.path(), crashing)).unwrap();
            assert_eq!(session.name(), "Unknown Engine");
            assert!(matches!(
                session.evaluate(START, 2, 5),
                Err(EngineError::Exited)
            ));
            assert_eq!(session.state(), SessionState::Stopped);
            assert!(matches!(
                session.evaluate(START, 2, 5),
                Err(EngineError::NotReady(SessionState::Stopped))
            ));
        }
    }
}
