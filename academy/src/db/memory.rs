//! In-memory store.
//!
//! Mirrors the Postgres store's behavior, including per-game exclusive
//! locking with a bounded wait, so integration tests and local
//! development can run the full stack without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::timeout;

use super::store::{GameStore, NewGame, StateUpdate, StoreResult, UpdateError, UserStore};
use crate::auth::{GameToken, User};
use crate::game::constants::{DEFAULT_SIPS_PER_BEER, GAME_LOCK_TIMEOUT};
use crate::game::entities::{Game, GameId, GameLocation, UserId};
use crate::game::reconcile::{GameUpdate, ReconcileOptions, reconcile};
use crate::game::shuffle;

/// In-memory [`GameStore`] and [`UserStore`].
pub struct MemoryGameStore {
    games: RwLock<HashMap<GameId, Arc<Mutex<Game>>>>,
    tokens: RwLock<HashMap<String, GameId>>,
    users: RwLock<HashMap<UserId, User>>,
    login_tokens: RwLock<HashMap<String, UserId>>,
    next_game_id: AtomicI64,
    lock_timeout: Duration,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            login_tokens: RwLock::new(HashMap::new()),
            next_game_id: AtomicI64::new(1),
            lock_timeout: GAME_LOCK_TIMEOUT,
        }
    }

    /// Shorten the lock wait, so contention tests don't sit out the full
    /// production timeout.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Register a user with their login token.
    pub async fn add_user(&self, user: User, login_token: &str) {
        self.login_tokens
            .write()
            .await
            .insert(login_token.to_string(), user.id);
        self.users.write().await.insert(user.id, user);
    }

    /// Take a game's update lock directly. While the guard is held,
    /// `update_state` calls for the same game wait and eventually fail
    /// with [`UpdateError::Busy`]; this is how contention handling is
    /// exercised in tests.
    pub async fn lock_game(&self, id: GameId) -> Option<OwnedMutexGuard<Game>> {
        let entry = self.games.read().await.get(&id).cloned()?;
        Some(entry.lock_owned().await)
    }
}

impl Default for MemoryGameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryGameStore {
    async fn user_by_login_token(&self, token: &str) -> StoreResult<Option<User>> {
        let Some(id) = self.login_tokens.read().await.get(token).copied() else {
            return Ok(None);
        };
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn create_game(
        &self,
        player_count: usize,
        official: bool,
        location: Option<GameLocation>,
        shuffle_indices: Vec<i32>,
    ) -> StoreResult<NewGame> {
        debug_assert!(shuffle::is_valid_shuffle_for_players(
            &shuffle_indices,
            player_count
        ));

        let id = self.next_game_id.fetch_add(1, Ordering::Relaxed);
        let token = GameToken::mint();

        // Millisecond precision, so clients echoing the start time match
        // it exactly.
        let now = Utc::now();
        let start_datetime =
            DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);

        let game = Game {
            id,
            start_datetime,
            end_datetime: None,
            official,
            dnf: false,
            shuffle_indices,
            sips_per_beer: DEFAULT_SIPS_PER_BEER,
            description: String::new(),
            location,
            players: Vec::new(),
            cards: Vec::new(),
        };

        self.games
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(game.clone())));
        self.tokens
            .write()
            .await
            .insert(token.key().to_string(), id);

        Ok(NewGame { game, token })
    }

    async fn game(&self, id: GameId) -> StoreResult<Option<Game>> {
        let Some(entry) = self.games.read().await.get(&id).cloned() else {
            return Ok(None);
        };
        Ok(Some(entry.lock().await.clone()))
    }

    async fn game_id_for_token(&self, key: &str) -> StoreResult<Option<GameId>> {
        Ok(self.tokens.read().await.get(key).copied())
    }

    async fn live_game_ids(&self) -> StoreResult<Vec<GameId>> {
        let games = self.games.read().await;
        let mut ids = Vec::new();
        for (id, entry) in games.iter() {
            if !entry.lock().await.has_ended() {
                ids.push(*id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn mark_dnf(&self, id: GameId) -> StoreResult<bool> {
        let Some(entry) = self.games.read().await.get(&id).cloned() else {
            return Ok(false);
        };
        let mut game = entry.lock().await;
        if game.has_ended() {
            return Ok(false);
        }
        game.dnf = true;
        Ok(true)
    }

    async fn update_state(
        &self,
        id: GameId,
        update: GameUpdate,
        opts: ReconcileOptions,
    ) -> Result<StateUpdate, UpdateError> {
        let entry = self
            .games
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(UpdateError::NotFound)?;

        let mut game = timeout(self.lock_timeout, entry.clone().lock_owned())
            .await
            .map_err(|_| UpdateError::Busy)?;

        let applied = reconcile(&game, update, &opts)?;

        let roster = if let Some(ids) = &applied.players {
            let users = self.users.read().await;
            let mut roster = Vec::with_capacity(ids.len());
            for user_id in ids {
                let user = users
                    .get(user_id)
                    .cloned()
                    .ok_or(UpdateError::UnknownPlayer(*user_id))?;
                roster.push(user);
            }
            roster
        } else {
            Vec::new()
        };

        applied.apply_to(&mut game, &roster);
        Ok(StateUpdate {
            game: game.clone(),
            applied,
        })
    }
}
