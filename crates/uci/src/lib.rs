//! Client side of the UCI (Universal Chess Interface) protocol.
//!
//! This crate formats the commands a GUI (or an analysis driver) sends to an
//! engine and classifies the lines the engine writes back.
//!
//! # Commands sent to the engine
//!
//! - `uci` / `uciok` - Handshake
//! - `setoption name <name> value <value>` - Configure the engine
//! - `isready` / `readyok` - Synchronization
//! - `position fen <fen>` - Set position
//! - `go depth <d>` - Start a depth-bounded search
//! - `stop` / `quit`
//!
//! # Engine output
//!
//! Every line is classified into an [`EngineMessage`]; search progress is
//! parsed into [`EngineInfo`].

mod command;
mod info;

pub use command::GuiCommand;
pub use info::{EngineInfo, InfoBuilder, Score};

/// Messages sent from engine to GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Engine identification (`id name ...` / `id author ...`).
    Id { name: Option<String>, author: Option<String> },
    /// UCI initialization complete.
    UciOk,
    /// Engine is ready.
    ReadyOk,
    /// Search information.
    Info(EngineInfo),
    /// Best move found; terminates a search. `None` when the position has no legal move.
    BestMove { mv: Option<String>, ponder: Option<String> },
    /// Anything else (option declarations, banners, blank lines).
    Other(String),
}

impl EngineMessage {
    /// Classify one line of engine output.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let mut parts = line.split_whitespace();

        match parts.next() {
            Some("uciok") => EngineMessage::UciOk,
            Some("readyok") => EngineMessage::ReadyOk,
            Some("id") => match parts.next() {
                Some("name") => EngineMessage::Id {
                    name: Some(parts.collect::<Vec<_>>().join(" ")),
                    author: None,
                },
                Some("author") => EngineMessage::Id {
                    name: None,
                    author: Some(parts.collect::<Vec<_>>().join(" ")),
                },
                _ => EngineMessage::Other(line.to_string()),
            },
            Some("info") => match EngineInfo::parse(line) {
                Some(info) => EngineMessage::Info(info),
                None => EngineMessage::Other(line.to_string()),
            },
            Some("bestmove") => {
                let mv = parts
                    .next()
                    .filter(|m| *m != "(none)" && *m != "0000")
                    .map(str::to_string);
                let ponder = match parts.next() {
                    Some("ponder") => parts.next().map(str::to_string),
                    _ => None,
                };
                EngineMessage::BestMove { mv, ponder }
            }
            _ => EngineMessage::Other(line.to_string()),
        }
    }
}
