//! Users and game tokens.
//!
//! There are no sessions here. Players hold opaque login tokens issued by
//! an external identity service; a game holds a single bearer token minted
//! at creation that authorizes state updates for that game alone.

pub mod errors;
pub mod models;

pub use errors::{AuthError, AuthResult};
pub use models::{GameToken, User};

use crate::db::store::UserStore;

/// Resolve a creation request's login tokens to users, in submission
/// order. Each token must resolve, and no user may sit at the table
/// twice.
pub async fn resolve_players(store: &dyn UserStore, tokens: &[String]) -> AuthResult<Vec<User>> {
    let mut players: Vec<User> = Vec::with_capacity(tokens.len());
    for key in tokens {
        let user = store
            .user_by_login_token(key)
            .await?
            .ok_or_else(|| AuthError::UnknownLoginToken(key.clone()))?;
        if players.iter().any(|p| p.id == user.id) {
            return Err(AuthError::DuplicateUser(user.username));
        }
        players.push(user);
    }
    Ok(players)
}
