//! HTTP API for the academy game server.
//!
//! # Endpoints
//!
//! ```text
//! GET  /health                              - Server health (public)
//! POST /api/v1/games                        - Create a game (public; player login tokens in body)
//! GET  /api/v1/games/live                   - Ids of live games (public)
//! GET  /api/v1/games/{id}                   - Game detail with player stats (public)
//! POST /api/v1/games/{id}/update_state      - Reconcile a client's game state (game token required)
//! ```
//!
//! The update endpoint is authenticated with the game's own bearer token
//! (`Authorization: GameToken <key>`), not a user session: any device at
//! the table can push state for exactly that game and nothing else.

pub mod games;
pub mod middleware;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use academy::{GameFinishedHook, GameStore, StatsCache, UserStore};

/// Application state shared across all handlers.
///
/// Trait objects keep the router backend-agnostic: production wires the
/// Postgres stores, tests the in-memory ones.
#[derive(Clone)]
pub struct AppState {
    pub games: Arc<dyn GameStore>,
    pub users: Arc<dyn UserStore>,
    pub finished_hook: Arc<dyn GameFinishedHook>,
    pub stats_cache: Arc<StatsCache>,
}

/// Create the complete API router with all endpoints and middleware.
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new()
        .route("/games", post(games::create_game))
        .route("/games/live", get(games::live_games))
        .route("/games/{game_id}", get(games::get_game));

    let protected_routes = Router::new()
        .route("/games/{game_id}/update_state", post(games::update_state))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::game_token_auth,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}

/// Health check endpoint for monitoring and load balancers.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.games.live_game_ids().await {
        Ok(ids) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "live_games": ids.len(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => {
            tracing::error!("health check failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unhealthy"})),
            )
        }
    }
}
