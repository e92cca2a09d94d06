//! Derived game state.
//!
//! The phase a game is in is never stored; it is a pure function of the
//! persisted snapshot. Updates are gated on the derived state: no card may
//! be appended while a chug is owed, and nothing may change once a game
//! has ended.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::entities::{Game, GamePlayer};

/// The phases of one game.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum GameState {
    /// The next card may be drawn.
    WaitingForDraw,
    /// The newest card is an ace with no chug reported yet.
    WaitingForChug,
    /// Every card is drawn; the server waits for the final submission.
    WaitingForEnd,
    /// End time recorded or the game was abandoned. Terminal.
    Ended,
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let repr = match self {
            Self::WaitingForDraw => "waiting for draw",
            Self::WaitingForChug => "waiting for chug",
            Self::WaitingForEnd => "waiting for end",
            Self::Ended => "ended",
        };
        write!(f, "{repr}")
    }
}

impl Game {
    /// Derive the current phase from the snapshot.
    pub fn state(&self) -> GameState {
        if self.has_ended() {
            return GameState::Ended;
        }

        if self.current_player_to_chug().is_some() {
            return GameState::WaitingForChug;
        }

        if self.cards.len() == self.deck_size() {
            return GameState::WaitingForEnd;
        }

        GameState::WaitingForDraw
    }

    /// The player whose turn it is, by draw order. `None` before the
    /// roster is populated.
    pub fn next_player_to_draw(&self) -> Option<&GamePlayer> {
        if self.players.is_empty() {
            return None;
        }
        self.players.get(self.cards.len() % self.players.len())
    }

    /// The player owing a chug: the one who drew the newest card, when
    /// that card is an ace without chug data.
    pub fn current_player_to_chug(&self) -> Option<&GamePlayer> {
        let card = self.cards.last()?;
        if !card.card().is_ace() || card.chug.is_some() || self.players.is_empty() {
            return None;
        }
        self.players.get((self.cards.len() - 1) % self.players.len())
    }
}
