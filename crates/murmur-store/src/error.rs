//! Store error types.

use murmur_protocol::Identity;
use thiserror::Error;

/// Errors raised by an [`EventStore`](crate::EventStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The referenced row does not exist, or was deleted for everyone.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The caller is neither sender nor receiver of the entity.
    #[error("User {identity} is not a participant of {entity} {id}")]
    NotParticipant {
        identity: Identity,
        entity: &'static str,
        id: i64,
    },

    /// Only the sender may perform this operation.
    #[error("User {identity} is not the author of message {id}")]
    NotAuthor { identity: Identity, id: i64 },

    /// A conversation needs two distinct identities.
    #[error("Cannot open a conversation with yourself")]
    SelfConversation,

    /// A thread panicked while holding the connection lock.
    #[error("Database lock poisoned")]
    Poisoned,

    /// The blocking task running the query failed.
    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// True for failures caused by the request rather than the store.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. }
                | StoreError::NotParticipant { .. }
                | StoreError::NotAuthor { .. }
                | StoreError::SelfConversation
        )
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
