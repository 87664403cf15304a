//! Chess position evaluation types.
//!
//! Every score is reported from the point of view of the side to move. All
//! comparisons go through [`Evaluation::normalized_value`], which projects
//! centipawn and mate scores onto one totally ordered integer scale.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized value of a position whose side to move is already checkmated.
/// Strictly smaller than every other normalized value.
pub const CHECKMATED: i32 = -100_000_000;

/// Mate distances must stay strictly below this bound.
pub const MATE_BOUND: i32 = 100;

/// Centipawn scores must stay strictly within this bound, well below the
/// smallest mate value.
pub const CENTIPAWN_BOUND: i32 = 100_000;

const MATE_SCALE: i32 = 1_000_000;

/// Errors raised when building an evaluation from engine data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// Mate distance outside `-99..=99`.
    #[error("Mate distance out of range: {0}")]
    MateOutOfRange(i32),
    /// Centipawn score outside `-99_999..=99_999`.
    #[error("Centipawn score out of range: {0}")]
    CentipawnsOutOfRange(i32),
}

/// Raw engine score: centipawns, or the signed number of moves to mate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "UncheckedScore")]
pub enum Score {
    /// Centipawn evaluation (positive = side to move is better).
    Centipawns(i32),
    /// Mate in N (positive = side to move mates, 0 = side to move is mated).
    Mate(i32),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum UncheckedScore {
    Centipawns(i32),
    Mate(i32),
}

impl TryFrom<UncheckedScore> for Score {
    type Error = EvaluationError;

    fn try_from(value: UncheckedScore) -> Result<Self, Self::Error> {
        match value {
            UncheckedScore::Centipawns(cp) => Score::centipawns(cp),
            UncheckedScore::Mate(n) => Score::mate(n),
        }
    }
}

impl Score {
    /// Build a mate score, enforcing `|n| < 100`.
    pub fn mate(n: i32) -> Result<Self, EvaluationError> {
        if n.abs() < MATE_BOUND {
            Ok(Score::Mate(n))
        } else {
            Err(EvaluationError::MateOutOfRange(n))
        }
    }

    /// Build a centipawn score, enforcing `|cp| < 100_000`.
    pub fn centipawns(cp: i32) -> Result<Self, EvaluationError> {
        if cp.checked_abs().is_some_and(|abs| abs < CENTIPAWN_BOUND) {
            Ok(Score::Centipawns(cp))
        } else {
            Err(EvaluationError::CentipawnsOutOfRange(cp))
        }
    }

    /// Convert a parsed UCI score.
    pub fn from_uci(score: uci::Score) -> Result<Self, EvaluationError> {
        match score {
            uci::Score::Cp(cp) => Score::centipawns(cp),
            uci::Score::Mate(n) => Score::mate(n),
        }
    }

    /// Centipawns, or the signed mate distance.
    pub fn raw(self) -> i32 {
        match self {
            Score::Centipawns(v) | Score::Mate(v) => v,
        }
    }

    pub fn is_mate(self) -> bool {
        matches!(self, Score::Mate(_))
    }

    /// Totally ordered projection, worst to best for the side to move.
    ///
    /// Shorter mates for the mover map to larger values, longer mates against
    /// the mover map to larger values than shorter ones, and every mate
    /// outweighs every centipawn score.
    pub fn normalized(self) -> i32 {
        match self {
            Score::Centipawns(cp) => cp,
            Score::Mate(0) => CHECKMATED,
            Score::Mate(n) => MATE_SCALE * n.signum() * (MATE_BOUND - n.abs()),
        }
    }
}

/// One engine-reported line at one depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: Score,
    /// First move of the line in SAN, `None` when the position has no legal move.
    #[serde(rename = "move")]
    pub mv: Option<String>,
    /// Continuation after the first move, in SAN. May be truncated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pv: Vec<String>,
    pub depth: u32,
    /// 1-based line index reported by the engine within this depth.
    pub rank: u32,
}

impl Evaluation {
    /// Evaluation for a position without legal moves: lost if checkmated,
    /// drawn if stalemated.
    pub fn terminal(checkmated: bool, depth: u32) -> Self {
        Self {
            score: if checkmated {
                Score::Mate(0)
            } else {
                Score::Centipawns(0)
            },
            mv: None,
            pv: Vec::new(),
            depth,
            rank: 1,
        }
    }

    pub fn raw(&self) -> i32 {
        self.score.raw()
    }

    pub fn is_mate(&self) -> bool {
        self.score.is_mate()
    }

    /// See [`Score::normalized`]. Always recomputed, never stored.
    pub fn normalized_value(&self) -> i32 {
        self.score.normalized()
    }

    /// Strength ordering among lines of one depth: higher normalized value
    /// wins, ties go to the lower engine line index.
    pub fn cmp_strength(&self, other: &Self) -> Ordering {
        self.normalized_value()
            .cmp(&other.normalized_value())
            .then_with(|| other.rank.cmp(&self.rank))
    }
}

/// The strongest of a set of lines, per [`Evaluation::cmp_strength`].
pub fn strongest<'a, I>(lines: I) -> Option<&'a Evaluation>
where
    I: IntoIterator<Item = &'a Evaluation>,
{
    lines.into_iter().max_by(|a, b| a.cmp_strength(b))
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Score::Centipawns(cp) => write!(f, "{:.2}", cp as f64 / 100.0),
            Score::Mate(0) => write!(f, "lost"),
            Score::Mate(n) if n > 0 => write!(f, "win in {}", n),
            Score::Mate(n) => write!(f, "lose in {}", -n),
        }
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-ply #{}: {} = {}; pv = {}",
            self.depth,
            self.rank,
            self.mv.as_deref().unwrap_or("-"),
            self.score,
            self.pv.join(" ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line(score: Score, rank: u32) -> Evaluation {
        Evaluation {
            score,
            mv: Some("e4".to_string()),
            pv: Vec::new(),
            depth: 16,
            rank,
        }
    }

    #[test]
    fn test_normalized_values() {
        assert_eq!(Score::Centipawns(-35).normalized(), -35);
        assert_eq!(Score::Mate(0).normalized(), CHECKMATED);
        assert_eq!(Score::Mate(1).normalized(), 99_000_000);
        assert_eq!(Score::Mate(-1).normalized(), -99_000_000);
        assert_eq!(Score::Mate(50).normalized(), 50_000_000);
        assert_eq!(Score::Mate(-50).normalized(), -50_000_000);
    }

    #[test]
    fn test_ordering_chain() {
        let chain = [
            Score::Mate(0),
            Score::Mate(-1),
            Score::Mate(-50),
            Score::Centipawns(-3000),
            Score::Centipawns(0),
            Score::Centipawns(3000),
            Score::Mate(50),
            Score::Mate(1),
        ];
        for pair in chain.windows(2) {
            assert!(
                pair[0].normalized() < pair[1].normalized(),
                "{:?} should be worse than {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_mate_bound_enforced() {
        assert_eq!(Score::mate(99), Ok(Score::Mate(99)));
        assert_eq!(Score::mate(-100), Err(EvaluationError::MateOutOfRange(-100)));
        assert!(Score::from_uci(uci::Score::Mate(150)).is_err());
        assert_eq!(
            Score::from_uci(uci::Score::Cp(-20)),
            Ok(Score::Centipawns(-20))
        );
    }

    #[test]
    fn test_centipawn_bound_enforced() {
        assert_eq!(Score::centipawns(-99_999), Ok(Score::Centipawns(-99_999)));
        assert_eq!(
            Score::centipawns(i32::MIN),
            Err(EvaluationError::CentipawnsOutOfRange(i32::MIN))
        );
        assert!(Score::from_uci(uci::Score::Cp(2_000_000)).is_err());

        // Even the largest accepted score stays below the longest mate
        assert!(Score::Centipawns(99_999).normalized() < Score::Mate(99).normalized());
        assert!(Score::Centipawns(-99_999).normalized() > Score::Mate(-99).normalized());
    }

    #[test]
    fn test_strongest_breaks_ties_by_rank() {
        let lines = vec![
            line(Score::Centipawns(40), 1),
            line(Score::Centipawns(40), 2),
            line(Score::Centipawns(10), 3),
        ];
        assert_eq!(strongest(&lines).unwrap().rank, 1);

        let lines = vec![line(Score::Centipawns(10), 1), line(Score::Mate(7), 2)];
        assert_eq!(strongest(&lines).unwrap().rank, 2);

        assert!(strongest(&Vec::<Evaluation>::new()).is_none());
    }

    #[test]
    fn test_terminal_evaluations() {
        let mated = Evaluation::terminal(true, 12);
        assert!(mated.is_mate());
        assert_eq!(mated.raw(), 0);
        assert_eq!(mated.mv, None);
        assert_eq!(mated.normalized_value(), CHECKMATED);

        let stalemate = Evaluation::terminal(false, 12);
        assert!(!stalemate.is_mate());
        assert_eq!(stalemate.normalized_value(), 0);
        assert!(mated.normalized_value() < stalemate.normalized_value());
    }

    #[test]
    fn test_serde_rejects_out_of_range_scores() {
        let json = r#"{"score":{"mate":120},"move":"Qh7","depth":10,"rank":1}"#;
        assert!(serde_json::from_str::<Evaluation>(json).is_err());

        let json = r#"{"score":{"centipawns":-2147483648},"move":"Qh7","depth":10,"rank":1}"#;
        assert!(serde_json::from_str::<Evaluation>(json).is_err());

        let json = r#"{"score":{"centipawns":-45},"move":"Nf3","depth":10,"rank":2}"#;
        let eval: Evaluation = serde_json::from_str(json).unwrap();
        assert_eq!(eval.score, Score::Centipawns(-45));
        assert!(eval.pv.is_empty());
    }

    #[test]
    fn test_display() {
        let mut eval = line(Score::Mate(-3), 2);
        eval.pv = vec!["Kh1".to_string(), "Qg2#".to_string()];
        assert_eq!(eval.to_string(), "16-ply #2: e4 = lose in 3; pv = Kh1 Qg2#");
    }

    /// Independent notion of "better for the side to move".
    fn goodness(score: Score) -> (u8, i32) {
        match score {
            Score::Mate(0) => (0, 0),
            Score::Mate(n) if n < 0 => (1, -n),
            Score::Centipawns(cp) => (2, cp),
            Score::Mate(n) => (3, -n),
        }
    }

    fn any_score() -> impl Strategy<Value = Score> {
        prop_oneof![
            (-30_000i32..30_000).prop_map(Score::Centipawns),
            (-99i32..100).prop_map(Score::Mate),
        ]
    }

    proptest! {
        #[test]
        fn normalized_value_orders_like_goodness(a in any_score(), b in any_score()) {
            prop_assert_eq!(
                a.normalized().cmp(&b.normalized()),
                goodness(a).cmp(&goodness(b))
            );
        }

        #[test]
        fn checkmated_is_the_minimum(s in any_score()) {
            prop_assert!(Score::Mate(0).normalized() <= s.normalized());
        }
    }
}
