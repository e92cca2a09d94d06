//! # Academy
//!
//! Game engine and state reconciliation for a turn-based drinking card
//! game played concurrently from multiple devices.
//!
//! The interesting problem this crate solves is synchronization: each
//! device periodically submits what it believes is the *entire* history of
//! a game, and the server reconciles that claim against its own record,
//! committing only the new suffix. A seed-style shuffle-index sequence
//! fixed at creation makes the deck order reproducible on both sides, so
//! every claimed card can be checked against the one true deck.
//!
//! ## Core Modules
//!
//! - [`game`]: card catalogue, shuffle engine, derived game state and the
//!   update reconciler
//! - [`db`]: store traits with Postgres and in-memory implementations
//! - [`auth`]: users, login-token resolution and per-game bearer tokens
//! - [`stats`]: seasons, per-game aggregates and the stats cache
//! - [`notify`]: the game-finished hook
//!
//! ## Example
//!
//! ```
//! use academy::game::shuffle;
//! use rand::{SeedableRng, rngs::StdRng};
//!
//! let mut rng = StdRng::seed_from_u64(1);
//! let indices = shuffle::generate_shuffle_indices_for_players(2, &mut rng);
//! assert!(shuffle::is_valid_shuffle_for_players(&indices, 2));
//! ```

pub mod auth;
pub mod db;
pub mod game;
pub mod notify;
pub mod stats;

pub use auth::{AuthError, AuthResult, GameToken, User};
pub use db::{
    Database, DatabaseConfig, GameStore, MemoryGameStore, NewGame, PgGameStore, PgUserStore,
    StateUpdate, StoreError, StoreResult, UpdateError, UserStore,
};
pub use game::{
    entities::{Card, Game, GameId, GameLocation, GamePlayer, Suit, UserId},
    reconcile::{GameUpdate, ReconcileError, ReconcileOptions, Reconciled, reconcile},
    state_machine::GameState,
};
pub use notify::{GameFinishedHook, LogNotifier};
pub use stats::{Season, StatsCache};
