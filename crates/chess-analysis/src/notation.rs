//! Translation of engine coordinate moves into algebraic notation.
//!
//! Board state and legality come from `shakmaty`; this module only replays
//! the engine's moves on a board to name them.

use shakmaty::fen::Fen;
use shakmaty::san::{San, SanPlus, Suffix};
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Position};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while setting up a board.
#[derive(Error, Debug)]
pub enum NotationError {
    /// The FEN string could not be parsed or describes an illegal setup.
    #[error("Invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },
}

/// Outcome for a position without legal moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Checkmate,
    Stalemate,
}

/// Set up a board from FEN (standard castling rules).
pub fn board_from_fen(fen: &str) -> Result<Chess, NotationError> {
    let invalid = |reason: String| NotationError::InvalidFen {
        fen: fen.to_string(),
        reason,
    };
    let setup: Fen = fen.parse().map_err(|e| invalid(format!("{}", e)))?;
    setup
        .into_position(CastlingMode::Standard)
        .map_err(|e| invalid(format!("{}", e)))
}

/// Checkmate or stalemate, if the side to move has no legal move.
pub fn terminal_state(board: &Chess) -> Option<Terminal> {
    if board.is_checkmate() {
        Some(Terminal::Checkmate)
    } else if board.is_stalemate() {
        Some(Terminal::Stalemate)
    } else {
        None
    }
}

/// Replay `moves` (coordinate notation, e.g. `e7e8q`) from `start` and
/// return them in SAN.
///
/// Decoding stops at the first move that is malformed or illegal in the
/// replayed position; the moves decoded before it are returned. Engines
/// occasionally emit such a move deep in a long line.
pub fn decode_line<S: AsRef<str>>(start: &Chess, moves: &[S]) -> Vec<String> {
    let mut board = start.clone();
    let mut decoded = Vec::with_capacity(moves.len());

    for (ply, raw) in moves.iter().enumerate() {
        let raw = raw.as_ref();
        let legal = raw
            .parse::<UciMove>()
            .ok()
            .and_then(|uci| uci.to_move(&board).ok());
        let Some(m) = legal else {
            debug!(ply, mv = raw, "Truncating line at illegal move");
            break;
        };

        let san = San::from_move(&board, m.clone());
        board.play_unchecked(m);
        decoded.push(
            SanPlus {
                san,
                suffix: Suffix::from_position(&board),
            }
            .to_string(),
        );
    }

    decoded
}

/// Compare two SAN strings ignoring check/mate suffixes and annotations.
pub fn same_move(a: &str, b: &str) -> bool {
    fn bare(s: &str) -> &str {
        s.trim_end_matches(['+', '#', '!', '?'])
    }
    bare(a) == bare(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[test]
    fn test_decode_opening_line() {
        let board = board_from_fen(START).unwrap();
        let san = decode_line(&board, &["e2e4", "e7e5", "g1f3", "b8c6", "f1b5"]);
        assert_eq!(san, vec!["e4", "e5", "Nf3", "Nc6", "Bb5"]);
    }

    #[test]
    fn test_decode_marks_check_and_mate() {
        // Scholar's mate position before Qxf7#
        let board = board_from_fen(
            "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4",
        )
        .unwrap();
        assert_eq!(decode_line(&board, &["h5f7"]), vec!["Qxf7#"]);
    }

    #[test]
    fn test_decode_castling_and_promotion() {
        let board = board_from_fen("4k3/1P6/8/8/8/8/8/4K2R w K - 0 1").unwrap();
        assert_eq!(decode_line(&board, &["e1g1"]), vec!["O-O"]);
        assert_eq!(decode_line(&board, &["b7b8q"]), vec!["b8=Q+"]);
    }

    #[test]
    fn test_decode_truncates_at_tenth_move() {
        let board = board_from_fen(START).unwrap();
        let moves = [
            "e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6", "d2d3", "f8c5", "c2c3",
            // illegal: the e1 king cannot jump to e3
            "e1e3", "d7d6",
        ];
        let san = decode_line(&board, &moves);
        assert_eq!(san.len(), 9);
        assert_eq!(san[0], "e4");
        assert_eq!(san[8], "c3");
    }

    #[test]
    fn test_decode_stops_at_garbage() {
        let board = board_from_fen(START).unwrap();
        assert_eq!(decode_line(&board, &["e2e4", "zz99"]), vec!["e4"]);
        assert!(decode_line(&board, &["e2e5"]).is_empty());
    }

    #[test]
    fn test_invalid_fen() {
        let err = board_from_fen("not a fen").unwrap_err();
        assert!(err.to_string().contains("not a fen"));
    }

    #[test]
    fn test_terminal_state() {
        let mate = board_from_fen("k5R1/7R/8/8/8/8/8/K7 b - - 3 2").unwrap();
        assert_eq!(terminal_state(&mate), Some(Terminal::Checkmate));

        let stalemate = board_from_fen("k7/5R2/8/8/1R6/8/8/K7 b - - 0 1").unwrap();
        assert_eq!(terminal_state(&stalemate), Some(Terminal::Stalemate));

        let start = board_from_fen(START).unwrap();
        assert_eq!(terminal_state(&start), None);
    }

    #[test]
    fn test_same_move_ignores_suffixes() {
        assert!(same_move("Qxf7#", "Qxf7"));
        assert!(same_move("Nf3+", "Nf3"));
        assert!(same_move("e4", "e4"));
        assert!(!same_move("Nf3", "Nc3"));
    }
}
