//! Caller identities and the credential-resolution seam.
//!
//! Issuing and verifying credentials belongs to an external collaborator; this
//! module only names what the dispatcher needs back from it.

use crate::error::DispatchError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Rider,
    Driver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Rider => f.write_str("rider"),
            Role::Driver => f.write_str("driver"),
        }
    }
}

/// A resolved caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn rider(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Rider,
        }
    }
    pub fn driver(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Driver,
        }
    }
}

pub trait Authenticator: Send + Sync {
    /// Resolve a bearer credential, failing with `Unauthenticated`.
    fn authenticate(&self, credential: &str) -> Result<Identity, DispatchError>;
}

/// In-process credential table.
#[derive(Default)]
pub struct TokenTable {
    tokens: DashMap<String, Identity>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn issue(&self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }
}

impl Authenticator for TokenTable {
    fn authenticate(&self, credential: &str) -> Result<Identity, DispatchError> {
        self.tokens
            .get(credential)
            .map(|entry| entry.value().clone())
            .ok_or(DispatchError::Unauthenticated)
    }
}
