//! AuthProvider port: the short-lived rotating credential.
//!
//! The pipeline asks for `token()` before every attempt and calls
//! `refresh()` once after an auth-class failure. How a token is obtained is
//! the provider's business.

use std::fmt;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Opaque bearer credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

impl Serialize for AuthToken {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential unavailable: {0}")]
    Unavailable(String),

    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current credential.
    async fn token(&self) -> Result<AuthToken, AuthError>;

    /// Obtains a new credential; later `token()` calls return it.
    async fn refresh(&self) -> Result<AuthToken, AuthError>;
}
