//! Authentication error types.

use thiserror::Error;

use crate::db::store::StoreError;

/// Errors resolving players for a new game.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A login token that resolves to no user
    #[error("User with token not found: {0}")]
    UnknownLoginToken(String),

    /// The same user appears behind more than one submitted token
    #[error("Same user logged in multiple times: {0}")]
    DuplicateUser(String),
}

impl AuthError {
    /// Client-safe message. Database errors are sanitized so internals
    /// don't leak into responses.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Database(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether this is a client mistake (400) rather than a server
    /// failure (500).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, AuthError::Database(_))
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(db) => Self::Database(db),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
