//! Move quality classification.
//!
//! A move is judged by comparing the evaluation of the position before it
//! with the evaluation of the position after it. The second one is reported
//! for the opponent (who is then to move), so it is negated before comparing.
//! Mate scores do not live on the centipawn scale and get their own rules.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::evaluation::Evaluation;

/// How bad a move was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Meh,
    Inaccuracy,
    Mistake,
    Blunder,
    /// The move handed the win to the opponent.
    Megablunder,
}

/// What to show next to a classified move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffDisplay {
    /// Evaluation change in centipawns, shown in pawns.
    Pawns(i32),
    /// Change of the mate distance in moves.
    MateDistance(i32),
    /// The winning side changed.
    SideSwapped,
    /// The mover's own losing mate turned into a non-mate score.
    LosingMateEscaped,
    /// The mover's winning mate was lost.
    MateLost,
    /// The opponent now has a forced mate.
    MateAllowed,
    /// The mover now has a forced mate.
    MateFound,
}

impl fmt::Display for DiffDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DiffDisplay::Pawns(cp) => write!(f, "{:.1}", cp as f64 / 100.0),
            DiffDisplay::MateDistance(change) if change > 0 => write!(f, "(+{})", change),
            DiffDisplay::MateDistance(change) if change < 0 => write!(f, "(\u{2212}{})", -change),
            DiffDisplay::MateDistance(_) => write!(f, "(0)"),
            DiffDisplay::SideSwapped => write!(f, "?!?!?!"),
            DiffDisplay::LosingMateEscaped => write!(f, "(\u{2212}mate)"),
            DiffDisplay::MateLost => write!(f, "\u{2212}mate"),
            DiffDisplay::MateAllowed => write!(f, "+mate"),
            DiffDisplay::MateFound => write!(f, "(+mate)"),
        }
    }
}

impl Serialize for DiffDisplay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Classification of one played move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MoveVerdict {
    pub severity: Severity,
    pub display: DiffDisplay,
}

impl MoveVerdict {
    fn new(severity: Severity, display: DiffDisplay) -> Self {
        Self { severity, display }
    }
}

/// Which comparison applies to a pair of evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Case {
    Plain,
    SideSwapped,
    MateShifted,
    LosingMateEscaped,
    WinningMateLost,
    MateAllowed,
    MateFound,
}

impl Case {
    fn of(before: &Evaluation, reply: &Evaluation) -> Self {
        if !before.is_mate() && !reply.is_mate() {
            Case::Plain
        } else if before.normalized_value().signum() == reply.normalized_value().signum() {
            // Same sign from opposite points of view
            Case::SideSwapped
        } else if before.is_mate() && reply.is_mate() {
            Case::MateShifted
        } else if before.is_mate() && before.raw() < 0 {
            Case::LosingMateEscaped
        } else if before.is_mate() {
            Case::WinningMateLost
        } else if reply.raw() > 0 {
            Case::MateAllowed
        } else {
            Case::MateFound
        }
    }
}

/// Classify the move played from a position.
///
/// `before` is the strongest line of the position the move was played from,
/// `reply` the strongest line at the same depth of the position it led to.
/// Returns `None` when the game is over after the move (`reply` has no move).
pub fn classify(before: &Evaluation, reply: &Evaluation) -> Option<MoveVerdict> {
    reply.mv.as_ref()?;

    let b = before.raw();
    let r = reply.raw();

    let verdict = match Case::of(before, reply) {
        Case::Plain => {
            let diff = -r - b;
            let severity = if diff < -700 {
                Severity::Blunder
            } else if diff < -450 {
                Severity::Mistake
            } else if diff < -160 {
                Severity::Inaccuracy
            } else if diff < -90 {
                Severity::Meh
            } else {
                Severity::None
            };
            MoveVerdict::new(severity, DiffDisplay::Pawns(diff))
        }
        Case::SideSwapped => MoveVerdict::new(Severity::Megablunder, DiffDisplay::SideSwapped),
        Case::MateShifted => {
            let change = (-r - b) * b.signum();
            let min = b.abs().min(r.abs());
            let severity = if change.abs() > 2 * min {
                Severity::Mistake
            } else if change.abs() > min {
                Severity::Inaccuracy
            } else {
                Severity::None
            };
            MoveVerdict::new(severity, DiffDisplay::MateDistance(change))
        }
        Case::LosingMateEscaped => {
            MoveVerdict::new(Severity::None, DiffDisplay::LosingMateEscaped)
        }
        Case::WinningMateLost => {
            let severity = if b <= 2 {
                Severity::Blunder
            } else if b <= 5 {
                Severity::Mistake
            } else if b <= 10 || -r < 20 {
                Severity::Inaccuracy
            } else {
                Severity::None
            };
            MoveVerdict::new(severity, DiffDisplay::MateLost)
        }
        Case::MateAllowed => {
            if b > -700 || (b > -1200 && r <= 4) {
                MoveVerdict::new(Severity::Megablunder, DiffDisplay::SideSwapped)
            } else {
                let severity = if b > -1400 {
                    Severity::Blunder
                } else if b > -2000 || r <= 10 {
                    Severity::Mistake
                } else {
                    Severity::None
                };
                MoveVerdict::new(severity, DiffDisplay::MateAllowed)
            }
        }
        Case::MateFound => MoveVerdict::new(Severity::None, DiffDisplay::MateFound),
    };
    Some(verdict)
}
