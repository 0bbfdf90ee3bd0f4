//! Admission credentials.
//!
//! Stands in for the external authentication service: a fixed table of
//! bearer tokens, each bound to one identity.

use murmur_protocol::Identity;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::TokenGrant;

/// Why an upgrade was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Unknown token")]
    UnknownToken,

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Token belongs to user {owner}, not {claimed}")]
    WrongIdentity { claimed: Identity, owner: Identity },
}

/// Token table built from configuration.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl TokenAuthenticator {
    #[must_use]
    pub fn new(grants: &[TokenGrant]) -> Self {
        Self {
            tokens: grants
                .iter()
                .map(|grant| (grant.token.clone(), grant.identity))
                .collect(),
        }
    }

    /// Check that `token` authenticates the identity named in the path.
    ///
    /// # Errors
    ///
    /// Returns why the credential does not admit `user_id`.
    pub fn authenticate(&self, user_id: &str, token: Option<&str>) -> Result<Identity, AuthError> {
        let claimed: Identity = user_id
            .parse()
            .map_err(|_| AuthError::InvalidUserId(user_id.to_string()))?;
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let owner = *self.tokens.get(token).ok_or(AuthError::UnknownToken)?;

        if owner != claimed {
            return Err(AuthError::WrongIdentity { claimed, owner });
        }
        Ok(claimed)
    }
}
