//! User and token models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::entities::UserId;

/// A player identity, resolved externally from an opaque login token.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// Per-game bearer credential minted at creation and never rotated.
/// Distinct from any user login; it authorizes updates for one game only.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GameToken(String);

impl GameToken {
    /// Mint a fresh token.
    pub fn mint() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn from_key(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }
}
