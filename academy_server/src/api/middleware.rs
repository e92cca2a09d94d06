//! Game-token authentication middleware.
//!
//! Update requests carry `Authorization: GameToken <key>`. The middleware
//! resolves the key to the game it was minted for and injects that id as
//! an [`AuthorizedGame`] extension; handlers compare it against the path.
//! A missing or unknown token is a 403 - there is no anonymous access to
//! game updates, and no user session to fall back on.

use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use serde_json::{Value, json};

use academy::{GameId, GameStore};

use super::AppState;

/// The game a request's bearer token authorizes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AuthorizedGame(pub GameId);

pub async fn game_token_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let mut parts = header.split_whitespace();
    let key = match (parts.next(), parts.next(), parts.next()) {
        (Some("GameToken"), Some(key), None) => key,
        _ => return Err(forbidden("No game token provided")),
    };

    match state.games.game_id_for_token(key).await {
        Ok(Some(game_id)) => {
            request.extensions_mut().insert(AuthorizedGame(game_id));
            Ok(next.run(request).await)
        }
        Ok(None) => Err(forbidden("No game with that token")),
        Err(e) => {
            tracing::error!("game token lookup failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": "Internal server error"})),
            ))
        }
    }
}

fn forbidden(detail: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::FORBIDDEN, Json(json!({"detail": detail})))
}
