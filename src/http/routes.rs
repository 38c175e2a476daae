//! HTTP route definitions

use axum::{
    extract::{Extension, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::PlayerRef;
use crate::http::middleware::{
    require_player, AuthenticatedPlayer, PLAYER_ID_HEADER, PLAYER_NAME_HEADER,
};
use crate::matchmaking::MatchmakingError;
use crate::tournament::TournamentError;
use crate::util::time::uptime_secs;
use crate::ws::handler::{matchmaking_ws_handler, pong_ws_handler, tournament_ws_handler};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let identity_headers = [
        header::CONTENT_TYPE,
        HeaderName::from_static(PLAYER_ID_HEADER),
        HeaderName::from_static(PLAYER_NAME_HEADER),
    ];

    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let cors = match &state.config.client_origin {
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_credentials(true)
        }
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
    .allow_headers(identity_headers);

    // Public routes (identity comes from the query string on sockets)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws/matchmaking", get(matchmaking_ws_handler))
        .route("/ws/pong/:game_id", get(pong_ws_handler))
        .route("/ws/tournament", get(tournament_ws_handler));

    // Player routes (identity headers required)
    let player_routes = Router::new()
        .route("/play/find-match", post(find_match_handler))
        .route("/play/cancel", post(cancel_handler))
        .route("/play/game-request", post(game_request_handler))
        .route("/play/game-request/accept", post(accept_request_handler))
        .route("/play/game-request/reject", post(reject_request_handler))
        .route("/tournaments", post(create_tournament_handler))
        .layer(middleware::from_fn(require_player))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    Router::new()
        .merge(public_routes)
        .merge(player_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    queue_size: usize,
    pending_requests: usize,
    lobby_size: usize,
    active_tournaments: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        queue_size: state.matchmaking.queue_size(),
        pending_requests: state.matchmaking.pending_requests(),
        lobby_size: state.tournaments.lobby_size(),
        active_tournaments: state.tournaments.active_tournaments(),
    })
}

// ============================================================================
// Matchmaking endpoints
// ============================================================================

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum FindMatchResponse {
    Queued,
    Matched { game_id: Uuid, opponent: PlayerRef },
}

async fn find_match_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedPlayer(player)): Extension<AuthenticatedPlayer>,
) -> Result<Json<FindMatchResponse>, AppError> {
    let player_id = player.id;
    let created = state.matchmaking.join_queue(player)?;

    Ok(Json(match created {
        None => FindMatchResponse::Queued,
        Some(created) => {
            let opponent = created
                .players
                .into_iter()
                .find(|p| p.id != player_id)
                .ok_or_else(|| AppError::Internal("paired with self".to_string()))?;
            FindMatchResponse::Matched {
                game_id: created.game_id,
                opponent,
            }
        }
    }))
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

async fn cancel_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedPlayer(player)): Extension<AuthenticatedPlayer>,
) -> Json<StatusResponse> {
    let status = if state.matchmaking.leave_queue(player.id) {
        "cancelled"
    } else {
        "not_queued"
    };
    Json(StatusResponse { status })
}

// ============================================================================
// Direct game requests
// ============================================================================

#[derive(Deserialize)]
struct GameRequestBody {
    target_id: Uuid,
    target_name: String,
}

#[derive(Serialize)]
struct GameRequestResponse {
    request_id: Uuid,
    expires_in: u64,
}

async fn game_request_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedPlayer(player)): Extension<AuthenticatedPlayer>,
    Json(req): Json<GameRequestBody>,
) -> Result<Json<GameRequestResponse>, AppError> {
    let target = PlayerRef::new(req.target_id, req.target_name);
    let request = state.matchmaking.request_game(player, target)?;

    Ok(Json(GameRequestResponse {
        request_id: request.request_id,
        expires_in: request.ttl.as_secs(),
    }))
}

#[derive(Deserialize)]
struct RequestAnswer {
    request_id: Uuid,
}

#[derive(Serialize)]
struct AcceptResponse {
    game_id: Uuid,
}

async fn accept_request_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedPlayer(player)): Extension<AuthenticatedPlayer>,
    Json(req): Json<RequestAnswer>,
) -> Result<Json<AcceptResponse>, AppError> {
    let created = state.matchmaking.accept_request(req.request_id, player.id)?;
    Ok(Json(AcceptResponse {
        game_id: created.game_id,
    }))
}

async fn reject_request_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedPlayer(player)): Extension<AuthenticatedPlayer>,
    Json(req): Json<RequestAnswer>,
) -> Result<Json<StatusResponse>, AppError> {
    state.matchmaking.decline_request(req.request_id, player.id)?;
    Ok(Json(StatusResponse { status: "declined" }))
}

// ============================================================================
// Tournaments
// ============================================================================

#[derive(Deserialize)]
struct CreateTournamentRequest {
    players: Vec<PlayerRef>,
}

#[derive(Serialize)]
struct CreateTournamentResponse {
    tournament_id: Uuid,
}

async fn create_tournament_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedPlayer(organizer)): Extension<AuthenticatedPlayer>,
    Json(req): Json<CreateTournamentRequest>,
) -> Result<(StatusCode, Json<CreateTournamentResponse>), AppError> {
    if !req.players.iter().any(|p| p.id == organizer.id) {
        return Err(AppError::Forbidden(
            "Organizer must be one of the players".to_string(),
        ));
    }

    let tournament_id = state.tournaments.start(req.players)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTournamentResponse { tournament_id }),
    ))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MatchmakingError> for AppError {
    fn from(e: MatchmakingError) -> Self {
        let message = e.to_string();
        match e {
            MatchmakingError::AlreadyQueued
            | MatchmakingError::AlreadyInMatch
            | MatchmakingError::DuplicateRequest => AppError::Conflict(message),
            MatchmakingError::SelfRequest => AppError::BadRequest(message),
            MatchmakingError::RequestNotFound => AppError::NotFound(message),
            MatchmakingError::RequestExpired => AppError::Gone(message),
            MatchmakingError::NotRequestTarget => AppError::Forbidden(message),
        }
    }
}

impl From<TournamentError> for AppError {
    fn from(e: TournamentError) -> Self {
        let message = e.to_string();
        match e {
            TournamentError::NotEnoughPlayers(_) | TournamentError::DuplicatePlayer(_) => {
                AppError::BadRequest(message)
            }
            TournamentError::AlreadyEntered(_) | TournamentError::Unavailable(_) => {
                AppError::Conflict(message)
            }
            _ => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Gone(msg) => (StatusCode::GONE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
