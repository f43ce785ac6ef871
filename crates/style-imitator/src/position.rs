//! Board snapshot maintained from `position` commands, and the scripted
//! opening for games that start from the initial position.

use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position};
use tracing::warn;

/// Canonical start position.
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// White's scripted first move.
pub const OPENING_WHITE: &str = "g1f3";
/// Black's scripted first move.
pub const OPENING_BLACK: &str = "d7d6";

/// How the current game began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialPosition {
    StartPos,
    Fen(String),
    /// No `position` command seen yet
    Unknown,
}

impl InitialPosition {
    fn is_standard_start(&self) -> bool {
        match self {
            InitialPosition::StartPos | InitialPosition::Unknown => true,
            InitialPosition::Fen(fen) => fen.split_whitespace().eq(STARTING_FEN.split_whitespace()),
        }
    }
}

/// Position state owned by the protocol bridge.
#[derive(Debug, Clone)]
pub struct BoardState {
    position: Chess,
    initial: InitialPosition,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            position: Chess::default(),
            initial: InitialPosition::Unknown,
        }
    }
}

impl BoardState {
    pub fn fen(&self) -> String {
        Fen::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    pub fn initial(&self) -> &InitialPosition {
        &self.initial
    }

    /// Apply `position {startpos | fen <6 fields>} [moves ...]`.
    ///
    /// Malformed commands leave the snapshot untouched. Replay stops at the
    /// first move that does not parse or is illegal.
    pub fn apply_command(&mut self, command: &str) -> bool {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        if tokens.first() != Some(&"position") || tokens.len() < 2 {
            return false;
        }

        let rest = &tokens[2..];
        let (mut position, initial, rest) = match tokens[1] {
            "startpos" => (Chess::default(), InitialPosition::StartPos, rest),
            "fen" if rest.len() >= 6 => {
                let fen_str = rest[..6].join(" ");
                match parse_fen(&fen_str) {
                    Some(pos) => (pos, InitialPosition::Fen(fen_str), &rest[6..]),
                    None => {
                        warn!(fen = %fen_str, "Ignoring position with invalid FEN");
                        return false;
                    }
                }
            }
            _ => {
                warn!(command, "Ignoring malformed position command");
                return false;
            }
        };

        if let Some(idx) = rest.iter().position(|t| *t == "moves") {
            for uci in &rest[idx + 1..] {
                let legal = uci
                    .parse::<UciMove>()
                    .ok()
                    .and_then(|m| m.to_move(&position).ok());
                match legal {
                    Some(mv) => position.play_unchecked(mv),
                    None => {
                        warn!(uci, "Illegal move in position command, replay stopped");
                        break;
                    }
                }
            }
        }

        self.position = position;
        self.initial = initial;
        true
    }
}

fn parse_fen(fen: &str) -> Option<Chess> {
    fen.parse::<Fen>()
        .ok()?
        .into_position(CastlingMode::Standard)
        .ok()
}

/// Scripted first move for the side to move, if this is its very first ply
/// of a game that began from the standard start position.
pub fn opening_move(position_fen: &str, initial: &InitialPosition) -> Option<&'static str> {
    if !initial.is_standard_start() {
        return None;
    }
    let fields: Vec<&str> = position_fen.split_whitespace().collect();
    let side = fields.get(1)?;
    let fullmove: u32 = fields.get(5)?.parse().ok()?;
    if fullmove != 1 {
        return None;
    }
    match *side {
        "w" => Some(OPENING_WHITE),
        "b" => Some(OPENING_BLACK),
        _ => None,
    }
}
