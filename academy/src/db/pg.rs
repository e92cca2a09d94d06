//! Postgres-backed stores.
//!
//! `update_state` is the one write path with real concurrency pressure:
//! several devices in the same game retry overlapping submissions. It
//! runs as a single transaction that takes the game's row lock up front
//! (`SELECT ... FOR UPDATE` under `SET LOCAL lock_timeout`), so updates
//! for one game serialize while other games proceed, and a rejected
//! payload rolls back without a trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

use super::store::{
    GameStore, NewGame, StateUpdate, StoreResult, UpdateError, UserStore,
};
use crate::auth::{GameToken, User};
use crate::game::constants::{DEFAULT_SIPS_PER_BEER, GAME_LOCK_TIMEOUT};
use crate::game::entities::{
    CardRecord, Chug, Game, GameId, GameLocation, GamePlayer, Suit, UserId,
};
use crate::game::reconcile::{GameUpdate, ReconcileOptions, reconcile};
use crate::game::shuffle;

/// Postgres error code for a lock_timeout expiry.
const LOCK_NOT_AVAILABLE: &str = "55P03";

const GAME_COLUMNS: &str = "SELECT id, start_datetime, end_datetime, official, dnf, \
     shuffle_indices, sips_per_beer, description, \
     location_latitude, location_longitude, location_accuracy \
     FROM games WHERE id = $1";

/// Postgres implementation of [`UserStore`].
pub struct PgUserStore {
    pool: Arc<PgPool>,
}

impl PgUserStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn user_by_login_token(&self, token: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, username FROM users WHERE login_token = $1")
            .bind(token)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(user_from_row))
    }

    async fn user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, username FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(user_from_row))
    }
}

fn user_from_row(row: PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
    }
}

/// Postgres implementation of [`GameStore`].
pub struct PgGameStore {
    pool: Arc<PgPool>,
}

impl PgGameStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GameStore for PgGameStore {
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

        // Millisecond precision, so clients echoing the start time match
        // it exactly.
        let now = Utc::now();
        let start_datetime =
            DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);

        let token = GameToken::mint();

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO games (start_datetime, official, sips_per_beer, description, \
             shuffle_indices, location_latitude, location_longitude, location_accuracy) \
             VALUES ($1, $2, $3, '', $4, $5, $6, $7) RETURNING id",
        )
        .bind(start_datetime)
        .bind(official)
        .bind(DEFAULT_SIPS_PER_BEER)
        .bind(&shuffle_indices)
        .bind(location.map(|l| l.latitude))
        .bind(location.map(|l| l.longitude))
        .bind(location.and_then(|l| l.accuracy))
        .fetch_one(&mut *tx)
        .await?;
        let id: GameId = row.get("id");

        sqlx::query("INSERT INTO game_tokens (game_id, key) VALUES ($1, $2)")
            .bind(id)
            .bind(token.key())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("created game {id} for {player_count} players");

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

        Ok(NewGame { game, token })
    }

    async fn game(&self, id: GameId) -> StoreResult<Option<Game>> {
        let row = sqlx::query(GAME_COLUMNS)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut game = game_from_row(&row)?;
        game.players = load_players(self.pool.as_ref(), id).await?;
        game.cards = load_cards(self.pool.as_ref(), id).await?;
        Ok(Some(game))
    }

    async fn game_id_for_token(&self, key: &str) -> StoreResult<Option<GameId>> {
        let row = sqlx::query("SELECT game_id FROM game_tokens WHERE key = $1")
            .bind(key)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(|r| r.get("game_id")))
    }

    async fn live_game_ids(&self) -> StoreResult<Vec<GameId>> {
        let rows =
            sqlx::query("SELECT id FROM games WHERE end_datetime IS NULL AND dnf = FALSE ORDER BY id")
                .fetch_all(self.pool.as_ref())
                .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn mark_dnf(&self, id: GameId) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE games SET dnf = TRUE WHERE id = $1 AND end_datetime IS NULL AND dnf = FALSE",
        )
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_state(
        &self,
        id: GameId,
        update: GameUpdate,
        opts: ReconcileOptions,
    ) -> Result<StateUpdate, UpdateError> {
        let mut tx = self.pool.begin().await?;

        let timeout_ms = GAME_LOCK_TIMEOUT.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!("{GAME_COLUMNS} FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(lock_error)?;
        let Some(row) = row else {
            return Err(UpdateError::NotFound);
        };

        let mut game = game_from_row(&row)?;
        game.players = load_players(&mut *tx, id).await?;
        game.cards = load_cards(&mut *tx, id).await?;

        // A rejection drops the transaction, so nothing written so far
        // (there is nothing yet) or after can leak out.
        let applied = reconcile(&game, update, &opts)?;

        let roster = if let Some(ids) = &applied.players {
            let mut roster = Vec::with_capacity(ids.len());
            for &user_id in ids {
                let row = sqlx::query("SELECT id, username FROM users WHERE id = $1")
                    .bind(user_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or(UpdateError::UnknownPlayer(user_id))?;
                roster.push(user_from_row(row));
            }
            for (position, user) in roster.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO game_players (game_id, user_id, position) VALUES ($1, $2, $3)",
                )
                .bind(id)
                .bind(user.id)
                .bind(position as i32)
                .execute(&mut *tx)
                .await?;
            }
            roster
        } else {
            Vec::new()
        };

        if let Some(description) = &applied.description {
            sqlx::query("UPDATE games SET description = $2 WHERE id = $1")
                .bind(id)
                .bind(description)
                .execute(&mut *tx)
                .await?;
        }

        if let Some((index, chug)) = applied.completed_chug {
            insert_chug(&mut tx, id, index, chug).await?;
        }

        for card in &applied.new_cards {
            sqlx::query(
                "INSERT INTO cards (game_id, card_index, value, suit, start_delta_ms) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(id)
            .bind(card.index as i32)
            .bind(card.value as i16)
            .bind(card.suit.code())
            .bind(card.start_delta_ms)
            .execute(&mut *tx)
            .await?;

            if let Some(chug) = card.chug {
                insert_chug(&mut tx, id, card.index, chug).await?;
            }
        }

        let dnf_ids: Vec<UserId> = applied.dnf_player_ids.iter().copied().collect();
        sqlx::query("UPDATE game_players SET dnf = (user_id = ANY($2)) WHERE game_id = $1")
            .bind(id)
            .bind(&dnf_ids)
            .execute(&mut *tx)
            .await?;

        if let Some(end_datetime) = applied.end_datetime {
            sqlx::query("UPDATE games SET end_datetime = $2 WHERE id = $1")
                .bind(id)
                .bind(end_datetime)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        applied.apply_to(&mut game, &roster);
        Ok(StateUpdate { game, applied })
    }
}

async fn insert_chug(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    game_id: GameId,
    card_index: usize,
    chug: Chug,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO chugs (game_id, card_index, start_delta_ms, duration_ms) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(game_id)
    .bind(card_index as i32)
    .bind(chug.start_delta_ms)
    .bind(chug.duration_ms)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn game_from_row(row: &PgRow) -> Result<Game, sqlx::Error> {
    let location = match (
        row.get::<Option<f64>, _>("location_latitude"),
        row.get::<Option<f64>, _>("location_longitude"),
    ) {
        (Some(latitude), Some(longitude)) => Some(GameLocation {
            latitude,
            longitude,
            accuracy: row.get("location_accuracy"),
        }),
        _ => None,
    };

    Ok(Game {
        id: row.get("id"),
        start_datetime: row.get("start_datetime"),
        end_datetime: row.get("end_datetime"),
        official: row.get("official"),
        dnf: row.get("dnf"),
        shuffle_indices: row.get("shuffle_indices"),
        sips_per_beer: row.get("sips_per_beer"),
        description: row.get("description"),
        location,
        players: Vec::new(),
        cards: Vec::new(),
    })
}

async fn load_players<'e, E>(executor: E, id: GameId) -> Result<Vec<GamePlayer>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query(
        "SELECT gp.user_id, u.username, gp.position, gp.dnf \
         FROM game_players gp JOIN users u ON u.id = gp.user_id \
         WHERE gp.game_id = $1 ORDER BY gp.position",
    )
    .bind(id)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .iter()
        .map(|row| GamePlayer {
            user_id: row.get("user_id"),
            username: row.get("username"),
            position: row.get::<i32, _>("position") as usize,
            dnf: row.get("dnf"),
        })
        .collect())
}

async fn load_cards<'e, E>(executor: E, id: GameId) -> Result<Vec<CardRecord>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query(
        "SELECT c.card_index, c.value, c.suit, c.start_delta_ms, \
         ch.start_delta_ms AS chug_start_delta_ms, ch.duration_ms AS chug_duration_ms \
         FROM cards c \
         LEFT JOIN chugs ch ON ch.game_id = c.game_id AND ch.card_index = c.card_index \
         WHERE c.game_id = $1 ORDER BY c.card_index",
    )
    .bind(id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            let code: String = row.get("suit");
            let suit = Suit::from_code(&code).ok_or_else(|| {
                sqlx::Error::Decode(format!("unknown suit code: {code}").into())
            })?;
            Ok(CardRecord {
                index: row.get::<i32, _>("card_index") as usize,
                value: row.get::<i16, _>("value") as u8,
                suit,
                start_delta_ms: row.get("start_delta_ms"),
                chug: row
                    .get::<Option<i64>, _>("chug_duration_ms")
                    .map(|duration_ms| Chug {
                        start_delta_ms: row.get("chug_start_delta_ms"),
                        duration_ms,
                    }),
            })
        })
        .collect()
}

fn lock_error(e: sqlx::Error) -> UpdateError {
    if let sqlx::Error::Database(db) = &e
        && db.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
    {
        return UpdateError::Busy;
    }
    UpdateError::Database(e)
}
