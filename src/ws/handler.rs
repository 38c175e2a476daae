//! WebSocket upgrade handlers for the matchmaking, game and tournament channels

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{Intent, MatchHandle, PlayerRef};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{parse_intent, ControlEvent, MatchmakingAction};
use crate::ws::transport::{ServerFrame, SessionTransport, FRAME_BUFFER};

/// Query parameters for WebSocket connections.
/// The gateway in front of this service authenticates and fills these in.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub player_id: Uuid,
    pub username: String,
}

impl WsQuery {
    fn player(self) -> PlayerRef {
        PlayerRef::new(self.player_id, self.username)
    }
}

/// `GET /ws/matchmaking`: queue actions in, matchmaking events out
pub async fn matchmaking_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let player = query.player();
    info!(player_id = %player.id, "Matchmaking socket upgrade");
    ws.on_upgrade(move |socket| handle_matchmaking_socket(socket, player, state))
}

/// `GET /ws/pong/:game_id`: paddle intents in, snapshots and match events out
pub async fn pong_ws_handler(
    ws: WebSocketUpgrade,
    Path(game_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(handle) = state.match_registry.get(&game_id) else {
        warn!(game_id = %game_id, "Socket for unknown match");
        return (StatusCode::NOT_FOUND, "Match not found").into_response();
    };
    if handle.side_of(query.player_id).is_none() {
        warn!(game_id = %game_id, player_id = %query.player_id, "Socket from non-participant");
        return (StatusCode::FORBIDDEN, "Not a participant").into_response();
    }

    let player = query.player();
    ws.on_upgrade(move |socket| handle_pong_socket(socket, player, handle))
}

/// `GET /ws/tournament`: lobby membership, tournament events and in-match traffic
pub async fn tournament_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let player = query.player();
    info!(player_id = %player.id, "Tournament socket upgrade");
    ws.on_upgrade(move |socket| handle_tournament_socket(socket, player, state))
}

async fn handle_matchmaking_socket(socket: WebSocket, player: PlayerRef, state: AppState) {
    let (transport, frames) = SessionTransport::channel(player.id, FRAME_BUFFER);
    state.matchmaking.register_player(transport.clone());

    let limiter = ConnectionRateLimiter::new();
    let matchmaking = state.matchmaking.clone();
    let me = player.clone();

    run_socket(socket, player.id, frames, move |text| {
        if !limiter.check_action() {
            warn!(player_id = %me.id, "Rate limited matchmaking action");
            return;
        }

        let action = match serde_json::from_str::<MatchmakingAction>(text) {
            Ok(action) => action,
            Err(e) => {
                warn!(player_id = %me.id, error = %e, "Failed to parse matchmaking action");
                return;
            }
        };

        match action {
            MatchmakingAction::FindMatch => {
                if let Err(e) = matchmaking.join_queue(me.clone()) {
                    let _ = transport.send_control(ControlEvent::QueueError {
                        message: e.to_string(),
                    });
                }
            }
            MatchmakingAction::CancelMatchmaking => {
                matchmaking.leave_queue(me.id);
            }
        }
    })
    .await;

    // Cleanup on disconnect
    state.matchmaking.unregister_player(player.id);
    info!(player_id = %player.id, "Matchmaking socket closed");
}

async fn handle_pong_socket(socket: WebSocket, player: PlayerRef, handle: MatchHandle) {
    let (transport, frames) = SessionTransport::channel(player.id, FRAME_BUFFER);
    if handle.attach(player.id, transport).await.is_err() {
        debug!(game_id = %handle.id, player_id = %player.id, "Match ended before attach");
        return;
    }
    info!(game_id = %handle.id, player_id = %player.id, "Game socket attached");

    let limiter = ConnectionRateLimiter::new();
    let session = handle.clone();
    let player_id = player.id;

    run_socket(socket, player_id, frames, move |text| {
        if !limiter.check_intent() {
            return;
        }
        let intent = parse_intent(text).unwrap_or_else(|| {
            debug!(player_id = %player_id, "Unrecognised intent, treating as idle");
            Intent::Idle
        });
        session.submit_intent(player_id, intent);
    })
    .await;

    // Session may already be over; a closed channel is fine here
    let _ = handle.disconnect(player_id).await;
    info!(game_id = %handle.id, player_id = %player_id, "Game socket closed");
}

async fn handle_tournament_socket(socket: WebSocket, player: PlayerRef, state: AppState) {
    let (transport, frames) = SessionTransport::channel(player.id, FRAME_BUFFER);
    state.tournaments.connect(transport.clone());

    if let Err(e) = state.tournaments.join_lobby(player.clone()) {
        warn!(player_id = %player.id, error = %e, "Tournament lobby join refused");
        let _ = transport.send_control(ControlEvent::QueueError {
            message: e.to_string(),
        });
    }

    let limiter = ConnectionRateLimiter::new();
    let tournaments = state.tournaments.clone();
    let player_id = player.id;

    run_socket(socket, player_id, frames, move |text| {
        if !limiter.check_intent() {
            return;
        }
        let intent = parse_intent(text).unwrap_or_else(|| {
            debug!(player_id = %player_id, "Unrecognised tournament message, treating as idle");
            Intent::Idle
        });
        tournaments.route_intent(player_id, intent);
    })
    .await;

    state.tournaments.disconnect(&transport);
    info!(player_id = %player_id, "Tournament socket closed");
}

/// Pump outbound frames to the socket while feeding inbound text to `on_text`.
/// Returns once the client goes away.
async fn run_socket<F>(
    socket: WebSocket,
    player_id: Uuid,
    frames: mpsc::Receiver<ServerFrame>,
    mut on_text: F,
) where
    F: FnMut(&str),
{
    let (ws_sink, mut ws_stream) = socket.split();

    // Spawn writer task: transport frames -> WebSocket
    let writer_handle = tokio::spawn(write_frames(ws_sink, frames, player_id));

    // Reader loop: WebSocket -> handler
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => on_text(&text),
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(player_id = %player_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(player_id = %player_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Snapshots go out as binary frames, control events as JSON text.
/// When every sender is gone the socket is closed from our side.
async fn write_frames(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<ServerFrame>,
    player_id: Uuid,
) {
    while let Some(frame) = frames.recv().await {
        let message = match frame {
            ServerFrame::Snapshot(bytes) => Message::Binary(bytes.to_vec()),
            ServerFrame::Control(event) => Message::Text(event.to_json()),
        };
        if let Err(e) = ws_sink.send(message).await {
            debug!(player_id = %player_id, error = %e, "WebSocket send failed");
            return;
        }
    }

    debug!(player_id = %player_id, "Outbound channel closed, closing socket");
    let _ = ws_sink.send(Message::Close(None)).await;
}
