//! Store trait definitions for testability and dependency injection.
//!
//! The server works against these traits so the HTTP layer can be driven
//! by either the Postgres implementation or the in-memory one.

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::{GameToken, User};
use crate::game::entities::{Game, GameId, GameLocation, UserId};
use crate::game::reconcile::{GameUpdate, ReconcileError, ReconcileOptions, Reconciled};

/// Errors from plain store reads and writes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from a state-update attempt. The variants map one-to-one onto
/// HTTP responses: `NotFound` 404, `Busy` 503 (retryable), `Rejected` 400
/// with a per-field map, the rest 500.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("game not found")]
    NotFound,
    /// Another update for the same game holds the lock. Safe to retry.
    #[error("another update for this game is in progress")]
    Busy,
    #[error("no user with id {0}")]
    UnknownPlayer(UserId),
    #[error(transparent)]
    Rejected(#[from] ReconcileError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A freshly created game and its update credential.
#[derive(Clone, Debug)]
pub struct NewGame {
    pub game: Game,
    pub token: GameToken,
}

/// The result of an accepted update: the delta that was applied and the
/// snapshot after it.
#[derive(Clone, Debug)]
pub struct StateUpdate {
    pub game: Game,
    pub applied: Reconciled,
}

/// User lookups. Users are managed by an external identity service; the
/// store only resolves them.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Resolve an opaque login token to its user.
    async fn user_by_login_token(&self, token: &str) -> StoreResult<Option<User>>;

    /// Find a user by id.
    async fn user_by_id(&self, id: UserId) -> StoreResult<Option<User>>;
}

/// Game persistence. One game's `update_state` calls serialize behind a
/// per-game exclusive lock; different games never contend.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Create a game with no players, a stored shuffle-index sequence
    /// sized for `player_count`, and a fresh token. The start time is
    /// recorded at millisecond precision so clients can echo it exactly.
    async fn create_game(
        &self,
        player_count: usize,
        official: bool,
        location: Option<GameLocation>,
        shuffle_indices: Vec<i32>,
    ) -> StoreResult<NewGame>;

    /// Load a full game snapshot.
    async fn game(&self, id: GameId) -> StoreResult<Option<Game>>;

    /// Resolve a game token key to the game it authorizes.
    async fn game_id_for_token(&self, key: &str) -> StoreResult<Option<GameId>>;

    /// Ids of games that are neither ended nor abandoned.
    async fn live_game_ids(&self) -> StoreResult<Vec<GameId>>;

    /// Mark a live game as abandoned. Called by the out-of-band sweep
    /// that expires stale games; a game that already ended is left
    /// untouched and `false` is returned.
    async fn mark_dnf(&self, id: GameId) -> StoreResult<bool>;

    /// Reconcile a client's claimed state against the stored game and
    /// persist the delta, all under the game's exclusive lock. Either the
    /// whole delta commits or nothing does.
    async fn update_state(
        &self,
        id: GameId,
        update: GameUpdate,
        opts: ReconcileOptions,
    ) -> Result<StateUpdate, UpdateError>;
}
