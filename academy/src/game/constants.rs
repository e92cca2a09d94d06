//! Game-wide constants.

use std::time::Duration;

/// Each suit contributes one card per value, so a game runs 13 rounds.
pub const VALUES_PER_SUIT: usize = 13;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 6;

/// Sips in a full beer. 14 makes a king exactly one beer.
pub const DEFAULT_SIPS_PER_BEER: i32 = 14;

/// Minimum step applied when the administrative fix-times mode pushes a
/// non-monotonic timestamp forward.
pub const FIX_TIMES_MIN_STEP_MS: i64 = 13_000;

/// Upper bound on waiting for another update of the same game to finish.
/// Past this the caller gets a retryable busy error.
pub const GAME_LOCK_TIMEOUT: Duration = Duration::from_secs(3);
