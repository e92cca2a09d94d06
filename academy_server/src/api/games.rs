//! Game API handlers.
//!
//! Validation failures come back as a per-field map (`{"cards": "..."}`),
//! so clients can tell which part of their submission to fix. Lock
//! contention is a 503 and safe to retry unchanged; reconciliation makes
//! the retry a no-op if the first attempt actually landed.

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use academy::game::constants::{MAX_PLAYERS, MIN_PLAYERS};
use academy::game::entities::{CardRecord, GameId, GameLocation, GamePlayer};
use academy::game::reconcile::{GameUpdate, ReconcileOptions};
use academy::game::shuffle;
use academy::game::state_machine::GameState;
use academy::stats::{PlayerGameStats, player_game_stats};
use academy::{GameFinishedHook, GameStore, UpdateError, User};

use super::AppState;
use super::middleware::AuthorizedGame;

type ApiError = (StatusCode, Json<Value>);

fn field_error(field: &str, message: impl Into<String>) -> ApiError {
    let mut map = Map::new();
    map.insert(field.to_string(), Value::String(message.into()));
    (StatusCode::BAD_REQUEST, Json(Value::Object(map)))
}

fn detail(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({"detail": message})))
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("internal error: {e}");
    detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

#[derive(Debug, Deserialize)]
pub struct CreateGameRequest {
    /// One login token per player, in seating order.
    pub tokens: Vec<String>,
    pub official: bool,
    #[serde(default)]
    pub location: Option<GameLocation>,
}

#[derive(Debug, Serialize)]
pub struct CreateGameResponse {
    pub id: GameId,
    /// The game's update credential. Shown once; it is never rotated.
    pub token: String,
    pub start_datetime: DateTime<Utc>,
    pub shuffle_indices: Vec<i32>,
    pub players: Vec<User>,
}

/// Create a game for the submitted players.
///
/// Each login token is resolved to a user; positions follow submission
/// order. The response carries everything a device needs to run the whole
/// game offline: the shuffle indices fix the deck, the token authorizes
/// later state submissions.
pub async fn create_game(
    State(state): State<AppState>,
    Json(request): Json<CreateGameRequest>,
) -> Result<Json<CreateGameResponse>, ApiError> {
    let count = request.tokens.len();
    if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&count) {
        return Err(field_error(
            "tokens",
            format!("expected between {MIN_PLAYERS} and {MAX_PLAYERS} player tokens, got {count}"),
        ));
    }

    let players = academy::auth::resolve_players(state.users.as_ref(), &request.tokens)
        .await
        .map_err(|e| {
            if e.is_client_error() {
                field_error("tokens", e.client_message())
            } else {
                internal(e)
            }
        })?;

    let shuffle_indices = shuffle::generate_shuffle_indices_for_players(count, &mut rand::rng());
    let created = state
        .games
        .create_game(count, request.official, request.location, shuffle_indices)
        .await
        .map_err(internal)?;

    tracing::info!(game_id = created.game.id, players = count, "game created");

    Ok(Json(CreateGameResponse {
        id: created.game.id,
        token: created.token.key().to_string(),
        start_datetime: created.game.start_datetime,
        shuffle_indices: created.game.shuffle_indices,
        players,
    }))
}

#[derive(Debug, Serialize)]
pub struct GameResponse {
    pub id: GameId,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: Option<DateTime<Utc>>,
    pub official: bool,
    pub dnf: bool,
    pub description: String,
    pub sips_per_beer: i32,
    pub shuffle_indices: Vec<i32>,
    pub location: Option<GameLocation>,
    pub state: GameState,
    pub players: Vec<GamePlayer>,
    pub cards: Vec<CardRecord>,
    pub player_stats: Vec<PlayerGameStats>,
}

/// Game detail: the full snapshot plus derived state and per-player
/// aggregates.
pub async fn get_game(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
) -> Result<Json<GameResponse>, ApiError> {
    let game = state
        .games
        .game(game_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| detail(StatusCode::NOT_FOUND, "Game does not exist"))?;

    let derived_state = game.state();
    let player_stats = player_game_stats(&game);

    Ok(Json(GameResponse {
        id: game.id,
        start_datetime: game.start_datetime,
        end_datetime: game.end_datetime,
        official: game.official,
        dnf: game.dnf,
        description: game.description,
        sips_per_beer: game.sips_per_beer,
        shuffle_indices: game.shuffle_indices,
        location: game.location,
        state: derived_state,
        players: game.players,
        cards: game.cards,
        player_stats,
    }))
}

/// Ids of games that are neither ended nor abandoned.
pub async fn live_games(State(state): State<AppState>) -> Result<Json<Vec<GameId>>, ApiError> {
    Ok(Json(state.games.live_game_ids().await.map_err(internal)?))
}

/// Reconcile a client's claimed full game state.
///
/// Runs under the game's exclusive lock. On the first transition to
/// finished, fires the game-finished hook and invalidates the stats cache
/// for the game's (season, player count).
pub async fn update_state(
    State(state): State<AppState>,
    Extension(AuthorizedGame(authorized)): Extension<AuthorizedGame>,
    Path(game_id): Path<GameId>,
    Json(update): Json<GameUpdate>,
) -> Result<Json<Value>, ApiError> {
    if authorized != game_id {
        // The token is real but minted for another game. Unknown ids are
        // still a 404, matching the unauthenticated read endpoints.
        let exists = state
            .games
            .game(game_id)
            .await
            .map_err(internal)?
            .is_some();
        return Err(if exists {
            detail(
                StatusCode::FORBIDDEN,
                "Token does not authorize this game",
            )
        } else {
            detail(StatusCode::NOT_FOUND, "Game does not exist")
        });
    }

    match state
        .games
        .update_state(game_id, update, ReconcileOptions::STRICT)
        .await
    {
        Ok(result) => {
            if result.applied.finishes_game() {
                state.stats_cache.invalidate_game(&result.game);
                state.finished_hook.game_finished(&result.game).await;
                tracing::info!(game_id, "game finished");
            }
            Ok(Json(json!({})))
        }
        Err(UpdateError::NotFound) => Err(detail(StatusCode::NOT_FOUND, "Game does not exist")),
        Err(UpdateError::Busy) => Err(detail(
            StatusCode::SERVICE_UNAVAILABLE,
            "Another update for this game is in progress, retry",
        )),
        Err(UpdateError::UnknownPlayer(id)) => {
            Err(field_error("player_ids", format!("No user with id {id}")))
        }
        Err(UpdateError::Rejected(e)) => Err(field_error(e.field(), e.to_string())),
        Err(UpdateError::Database(e)) => Err(internal(e)),
    }
}
