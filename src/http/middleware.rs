//! Player identity middleware
//!
//! Authentication happens upstream; the gateway forwards the verified player
//! as `X-Player-Id` / `X-Player-Name` headers.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use uuid::Uuid;

use crate::game::PlayerRef;

pub const PLAYER_ID_HEADER: &str = "x-player-id";
pub const PLAYER_NAME_HEADER: &str = "x-player-name";

/// Identity errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Invalid player id")]
    InvalidPlayerId,

    #[error("Empty player name")]
    EmptyName,
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let status = match &self {
            IdentityError::MissingHeader(_) => StatusCode::UNAUTHORIZED,
            IdentityError::InvalidPlayerId | IdentityError::EmptyName => StatusCode::BAD_REQUEST,
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// The caller, as forwarded by the gateway
#[derive(Debug, Clone)]
pub struct AuthenticatedPlayer(pub PlayerRef);

/// Read the forwarded identity headers
pub fn player_from_headers(headers: &HeaderMap) -> Result<PlayerRef, IdentityError> {
    let header = |name: &'static str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .ok_or(IdentityError::MissingHeader(name))
    };

    let id = header(PLAYER_ID_HEADER)?
        .parse::<Uuid>()
        .map_err(|_| IdentityError::InvalidPlayerId)?;
    let username = header(PLAYER_NAME_HEADER)?;
    if username.is_empty() {
        return Err(IdentityError::EmptyName);
    }

    Ok(PlayerRef::new(id, username))
}

/// Middleware to require a forwarded player identity
pub async fn require_player(mut request: Request, next: Next) -> Result<Response, IdentityError> {
    let player = player_from_headers(request.headers())?;

    // Insert into request extensions for handlers to access
    request.extensions_mut().insert(AuthenticatedPlayer(player));

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_identity_headers() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        assert_eq!(
            player_from_headers(&headers).unwrap_err(),
            IdentityError::MissingHeader(PLAYER_ID_HEADER)
        );

        headers.insert(PLAYER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        headers.insert(PLAYER_NAME_HEADER, HeaderValue::from_static("amy"));
        assert_eq!(
            player_from_headers(&headers).unwrap_err(),
            IdentityError::InvalidPlayerId
        );

        headers.insert(PLAYER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(player_from_headers(&headers).unwrap(), PlayerRef::new(id, "amy"));

        headers.insert(PLAYER_NAME_HEADER, HeaderValue::from_static("  "));
        assert_eq!(player_from_headers(&headers).unwrap_err(), IdentityError::EmptyName);
    }
}
