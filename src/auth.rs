//! Credential access for authenticated subscriptions and commands
//!
//! The sync engine never stores tokens itself; it asks a [`CredentialProvider`]
//! for the current access token before every (re)connect attempt and invokes
//! `refresh` when the server reports an expired token. Applications embed
//! their own token lifecycle behind this trait.

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current access token, appended to every connection URL and bearer
    /// header. Must return the freshest token known to the provider.
    async fn access_token(&self) -> Result<String>;

    /// Obtain a new access token. Called by the reconnect policy before the
    /// single permitted auth-expiry reconnect.
    async fn refresh(&self) -> Result<()>;
}

/// Fixed-token provider for tests and short-lived CLI sessions.
///
/// `refresh` is a no-op: the same token is presented again on reconnect.
pub struct StaticCredentials {
    token: RwLock<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
        }
    }

    /// Replace the stored token, e.g. after an out-of-band login.
    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = token.into();
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.read().await.clone())
    }

    async fn refresh(&self) -> Result<()> {
        tracing::debug!("Static credentials cannot be refreshed, reusing stored token");
        Ok(())
    }
}
