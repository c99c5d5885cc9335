//! Credential providers.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::ports::{AuthError, AuthProvider, AuthToken};

/// Always the same token; `refresh` hands it back unchanged.
#[derive(Debug, Clone)]
pub struct StaticAuthProvider {
    token: AuthToken,
}

impl StaticAuthProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AuthToken::new(token),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn token(&self) -> Result<AuthToken, AuthError> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> Result<AuthToken, AuthError> {
        Ok(self.token.clone())
    }
}

/// Issues `<prefix>-<generation>`; every refresh bumps the generation.
#[derive(Debug)]
pub struct RotatingAuthProvider {
    prefix: String,
    generation: AtomicU64,
}

impl RotatingAuthProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn issue(&self, generation: u64) -> AuthToken {
        AuthToken::new(format!("{}-{generation}", self.prefix))
    }
}

#[async_trait]
impl AuthProvider for RotatingAuthProvider {
    async fn token(&self) -> Result<AuthToken, AuthError> {
        Ok(self.issue(self.generation()))
    }

    async fn refresh(&self) -> Result<AuthToken, AuthError> {
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.issue(next))
    }
}
