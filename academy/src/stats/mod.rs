//! Seasons, per-game aggregates and the stats cache.
//!
//! Full ranking/achievement computation lives outside this crate; what is
//! here is the read-side a finished game feeds: season bucketing,
//! per-player aggregates for the game-detail endpoint, and a cache with
//! explicit invalidation. The cache is deliberately pull-through with
//! invalidation called from the game-finished and game-deleted code paths
//! rather than being refreshed by hidden dispatch.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::game::entities::{Game, UserId};

/// Seasons are half-years counted from January 2013; season 1 is
/// Jan-Jun 2013.
pub const FIRST_SEASON_YEAR: i32 = 2013;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Season {
    pub number: u32,
}

impl Season {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let mut number = (at.year() - FIRST_SEASON_YEAR) * 2 + 1;
        if at.month() >= 7 {
            number += 1;
        }
        Self {
            number: number.max(0) as u32,
        }
    }

    pub fn current() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// The season a game counts towards. A game belongs to the season it
    /// ended in; live and abandoned games have none.
    pub fn of_game(game: &Game) -> Option<Self> {
        game.end_datetime.map(Self::from_datetime)
    }
}

/// Per-player aggregates over one game, served with the game detail.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PlayerGameStats {
    pub user_id: UserId,
    pub username: String,
    pub total_sips: i64,
    pub cards_drawn: usize,
    pub full_beers: i64,
    pub extra_sips: i64,
    pub total_time_ms: i64,
    pub turns_completed: usize,
}

/// Compute per-player aggregates from a snapshot.
///
/// A turn's time is the gap between a card's offset and the next card's;
/// the final turn is closed by the end time when the game has one.
pub fn player_game_stats(game: &Game) -> Vec<PlayerGameStats> {
    let n = game.players.len();
    if n == 0 {
        return Vec::new();
    }

    let mut stats: Vec<PlayerGameStats> = game
        .players
        .iter()
        .map(|p| PlayerGameStats {
            user_id: p.user_id,
            username: p.username.clone(),
            total_sips: 0,
            cards_drawn: 0,
            full_beers: 0,
            extra_sips: 0,
            total_time_ms: 0,
            turns_completed: 0,
        })
        .collect();

    for (i, card) in game.cards.iter().enumerate() {
        let entry = &mut stats[i % n];
        entry.total_sips += i64::from(card.value);
        entry.cards_drawn += 1;
    }

    let mut turn_ends: Vec<i64> = game
        .cards
        .iter()
        .skip(1)
        .map(|c| c.start_delta_ms)
        .collect();
    if let Some(duration) = game.duration() {
        turn_ends.push(duration.num_milliseconds());
    }

    for (i, end) in turn_ends.iter().enumerate() {
        let entry = &mut stats[i % n];
        entry.total_time_ms += end - game.cards[i].start_delta_ms;
        entry.turns_completed += 1;
    }

    let sips_per_beer = i64::from(game.sips_per_beer.max(1));
    for entry in &mut stats {
        entry.full_beers = entry.total_sips / sips_per_beer;
        entry.extra_sips = entry.total_sips % sips_per_beer;
    }

    stats
}

/// Cache key: season and table size. Rankings differ per player count, so
/// both dimensions invalidate independently.
pub type StatsKey = (u32, usize);

/// Aggregate cached per (season, player count).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SeasonAggregate {
    pub games: u64,
    pub total_sips: i64,
    pub total_duration_ms: i64,
}

/// Pull-through cache for season aggregates.
///
/// Population happens on read via [`StatsCache::get_or_compute`];
/// invalidation is an explicit call from the code paths that change the
/// underlying data (a game finishing or being deleted), passing the keys
/// the event touches.
#[derive(Default)]
pub struct StatsCache {
    inner: RwLock<HashMap<StatsKey, Arc<SeasonAggregate>>>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: StatsKey) -> Option<Arc<SeasonAggregate>> {
        self.read().get(&key).cloned()
    }

    /// Return the cached aggregate, computing and storing it on a miss.
    pub fn get_or_compute<F>(&self, key: StatsKey, compute: F) -> Arc<SeasonAggregate>
    where
        F: FnOnce() -> SeasonAggregate,
    {
        if let Some(cached) = self.get(key) {
            return cached;
        }
        let computed = Arc::new(compute());
        self.write().insert(key, computed.clone());
        computed
    }

    pub fn invalidate(&self, key: StatsKey) {
        self.write().remove(&key);
    }

    /// Drop the entry a game contributes to. Called when a game finishes
    /// or is deleted; a game that never ended touches no season.
    pub fn invalidate_game(&self, game: &Game) {
        if let Some(season) = Season::of_game(game) {
            self.invalidate((season.number, game.player_count()));
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<StatsKey, Arc<SeasonAggregate>>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<StatsKey, Arc<SeasonAggregate>>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
