//! Game-finished notification hook.
//!
//! Social posting, push notifications and ranking recalculation are
//! external collaborators. The server calls this hook explicitly from the
//! update path on the first not-ended to ended transition; there is no
//! hidden dispatch, and a replayed final update never fires it twice.

use async_trait::async_trait;
use log::info;

use crate::game::entities::Game;

#[async_trait]
pub trait GameFinishedHook: Send + Sync {
    async fn game_finished(&self, game: &Game);
}

/// Default hook: log the finish and nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl GameFinishedHook for LogNotifier {
    async fn game_finished(&self, game: &Game) {
        info!(
            "game {} between {} finished after {} cards",
            game.id,
            game.players_str(),
            game.cards.len()
        );
    }
}
