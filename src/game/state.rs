//! Match data model shared by the engine, sessions and tournaments

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A participant as the core sees it. Identity is owned by an upstream service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerRef {
    pub id: Uuid,
    pub username: String,
}

impl PlayerRef {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// Which paddle a player controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Player1,
    Player2,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Player1 => 0,
            Side::Player2 => 1,
        }
    }

    pub fn opponent(self) -> Self {
        match self {
            Side::Player1 => Side::Player2,
            Side::Player2 => Side::Player1,
        }
    }

    /// Role label sent to clients
    pub fn role(self) -> &'static str {
        match self {
            Side::Player1 => "player1",
            Side::Player2 => "player2",
        }
    }
}

/// Requested paddle direction for the next tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Intent {
    Up = 1,
    Down = 2,
    #[default]
    Idle = 0,
}

impl Intent {
    /// Direction multiplier: up is towards y = 0
    pub fn sign(self) -> f32 {
        match self {
            Intent::Up => -1.0,
            Intent::Down => 1.0,
            Intent::Idle => 0.0,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Out-of-vocabulary values decay to Idle
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Intent::Up,
            2 => Intent::Down,
            _ => Intent::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PaddleState {
    pub y: f32,
    pub intent: Intent,
}

/// Ball position and heading. `direction` axes are ±1 once served, zero before.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BallState {
    pub position: Vector2,
    pub direction: Vector2,
}

impl BallState {
    pub fn is_served(&self) -> bool {
        self.direction != Vector2::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Score {
    pub player1: u32,
    pub player2: u32,
}

impl Score {
    pub fn total(&self) -> u32 {
        self.player1 + self.player2
    }

    pub fn leader(&self) -> u32 {
        self.player1.max(self.player2)
    }

    pub fn credit(&mut self, side: Side) {
        match side {
            Side::Player1 => self.player1 += 1,
            Side::Player2 => self.player2 += 1,
        }
    }
}

/// Full authoritative state of one match; the unit serialized into snapshots
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MatchState {
    pub ball: BallState,
    pub paddle1: PaddleState,
    pub paddle2: PaddleState,
    pub score: Score,
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchEndReason {
    NormalCompletion,
    OpponentDisconnected,
    /// Tournament walkover: the opponent withdrew before the match started
    Forfeit,
}

/// Immutable record of a decided match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: Uuid,
    pub players: [PlayerRef; 2],
    pub winner: PlayerRef,
    pub score: Score,
    pub reason: MatchEndReason,
}

impl MatchResult {
    pub fn loser(&self) -> &PlayerRef {
        if self.players[0].id == self.winner.id {
            &self.players[1]
        } else {
            &self.players[0]
        }
    }

    pub fn involves(&self, player_id: Uuid) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }
}

/// What a session hands back to whoever created it
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Completed(MatchResult),
    /// Nobody ever attached before the join grace period ran out
    Abandoned { match_id: Uuid },
}

impl MatchOutcome {
    pub fn match_id(&self) -> Uuid {
        match self {
            MatchOutcome::Completed(result) => result.match_id,
            MatchOutcome::Abandoned { match_id } => *match_id,
        }
    }

    pub fn result(&self) -> Option<&MatchResult> {
        match self {
            MatchOutcome::Completed(result) => Some(result),
            MatchOutcome::Abandoned { .. } => None,
        }
    }
}
