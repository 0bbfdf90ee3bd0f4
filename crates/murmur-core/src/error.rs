//! Hub errors.

use murmur_protocol::ProtocolError;
use murmur_store::StoreError;
use thiserror::Error;

/// Errors surfaced by hub operations and frame handlers.
#[derive(Debug, Error)]
pub enum HubError {
    /// Persistence failed, or rejected the request.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The inbound frame could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A post cannot be shared with its own sender.
    #[error("Cannot share a post with yourself")]
    SelfShare,
}

impl HubError {
    /// True when the request was refused (bad input, missing target, not
    /// allowed) rather than the hub failing to process it.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        match self {
            HubError::Store(e) => e.is_rejection(),
            HubError::Protocol(_) | HubError::SelfShare => true,
        }
    }
}

/// Result alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
