//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::state::{Intent, PlayerRef};

/// Player description inside `player_info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCard {
    pub id: Uuid,
    pub username: String,
    /// "player1" (left paddle) or "player2" (right paddle)
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfoData {
    pub current_player: PlayerCard,
    pub opponent: PlayerCard,
}

/// Terminal reason attached to `game_over`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    Disconnection,
}

/// JSON control frames sent from server to client.
/// Low-frequency: only emitted on phase transitions, never per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlEvent {
    /// Both players are attached; sent once before the ball is served
    PlayerInfo { data: PlayerInfoData },

    /// Tick loop has started serving
    GameStart { game_id: Uuid },

    /// Terminal event. `winner: None` is a tie, which this server never produces.
    GameOver {
        winner: Option<String>,
        reason: Option<GameOverReason>,
    },

    /// Matchmaking paired this player into a session
    Matched { game_id: Uuid },

    /// Someone challenged this player directly
    GameRequest {
        request_id: Uuid,
        requester: PlayerRef,
        expires_in: u64,
    },

    /// Target declined a request this player made
    RequestDeclined { request_id: Uuid },

    /// A request this player made or received timed out
    RequestExpired { request_id: Uuid },

    /// A matchmaking action was refused
    QueueError { message: String },

    /// Tournament lobby membership changed
    TournamentStatus { participants: Vec<PlayerRef> },

    /// This player's next tournament match is live
    MatchStarted { game_id: Uuid, opponent: PlayerRef },

    /// Tournament finished
    TournamentEnd { winner: String },
}

impl ControlEvent {
    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Structured paddle message accepted on game and tournament channels
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PaddleMessage {
    PaddleMove { direction: String },
}

/// Parse a paddle intent from a text frame.
///
/// Accepts single-key codes (`w` up, `s` down, `x` stop) or
/// `{"type":"paddle_move","direction":"up"|"down"|"stop"}`.
/// Returns `None` for anything else.
pub fn parse_intent(text: &str) -> Option<Intent> {
    let trimmed = text.trim();
    match trimmed {
        "w" | "W" => return Some(Intent::Up),
        "s" | "S" => return Some(Intent::Down),
        "x" | "X" => return Some(Intent::Idle),
        _ => {}
    }

    let PaddleMessage::PaddleMove { direction } = serde_json::from_str(trimmed).ok()?;
    match direction.as_str() {
        "up" => Some(Intent::Up),
        "down" => Some(Intent::Down),
        "stop" | "idle" => Some(Intent::Idle),
        _ => None,
    }
}

/// Control actions on the matchmaking channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MatchmakingAction {
    FindMatch,
    CancelMatchmaking,
}
