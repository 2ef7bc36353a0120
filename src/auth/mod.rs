//! Session authentication
//!
//! Keeps an access/refresh/id token triple alive across polling cycles:
//! - lazy login or refresh when the token is missing or expired
//! - single-flight refresh shared by concurrent callers
//! - forced refresh for the 401 retry path and the proactive refresh timer
//! - best-effort persistence through the credential store

mod cognito;
mod store;

pub use cognito::CognitoProvider;
pub use store::CredentialStore;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::AuthError;
use crate::types::{IssuedTokens, TokenBundle};

/// Identity provider capability: password login and refresh-token exchange
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<IssuedTokens, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, AuthError>;
}

/// Owns the in-memory token bundle for one account
pub struct SessionAuthenticator {
    username: String,
    password: String,
    provider: Arc<dyn IdentityProvider>,
    store: CredentialStore,
    state: Mutex<TokenBundle>,
}

impl SessionAuthenticator {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        provider: Arc<dyn IdentityProvider>,
        store: CredentialStore,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            provider,
            store,
            state: Mutex::new(TokenBundle::default()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Seed from the credential file. Expiry is unknown after a restore, so
    /// the next `get_valid_token` refreshes with the restored refresh token.
    pub async fn restore(&self) -> bool {
        match self.store.load().await {
            Ok(bundle) => {
                let mut state = self.state.lock().await;
                *state = TokenBundle {
                    expires_at: None,
                    ..bundle
                };
                info!(account = %self.username, "📂 Restored session from token file");
                true
            }
            Err(e) => {
                debug!(account = %self.username, error = %e, "No reusable token file");
                false
            }
        }
    }

    /// Current access token, logging in or refreshing first when needed
    pub async fn get_valid_token(&self) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        if state.is_usable() && !state.is_expired_at(Utc::now()) {
            return Ok(state.access_token.clone());
        }
        self.refresh_or_authenticate(&mut state).await?;
        Ok(state.access_token.clone())
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.state.lock().await.has_refresh_token()
    }

    /// Refresh after the server rejected `stale_token`.
    ///
    /// When another caller already replaced `stale_token`, the current token
    /// is returned without a provider call.
    pub async fn force_refresh(&self, stale_token: &str) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        if state.is_usable() && state.access_token != stale_token {
            debug!(account = %self.username, "Token already refreshed by another unit");
            return Ok(state.access_token.clone());
        }
        if !state.has_refresh_token() {
            return Err(AuthError::NoRefreshToken);
        }
        self.refresh_or_authenticate(&mut state).await?;
        Ok(state.access_token.clone())
    }

    /// Unconditional refresh-or-login, driven by the proactive refresh timer
    pub async fn refresh_now(&self) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        self.refresh_or_authenticate(&mut state).await
    }

    /// Snapshot of the current bundle
    pub async fn snapshot(&self) -> TokenBundle {
        self.state.lock().await.clone()
    }

    /// Refresh when a refresh token is held. A refresh token the provider
    /// rejects is dropped and the password login runs instead; transport and
    /// malformed-response failures surface unchanged.
    async fn refresh_or_authenticate(&self, state: &mut TokenBundle) -> Result<(), AuthError> {
        if state.has_refresh_token() {
            debug!(account = %self.username, "Refreshing session");
            match self.provider.refresh(&state.refresh_token).await {
                Ok(issued) => {
                    self.update_tokens(state, issued).await;
                    return Ok(());
                }
                Err(e @ AuthError::Rejected { .. }) => {
                    warn!(
                        account = %self.username,
                        error = %e,
                        "Refresh token rejected, falling back to password login"
                    );
                    state.refresh_token.clear();
                }
                Err(e) => {
                    error!(account = %self.username, error = %e, "Token refresh failed");
                    return Err(e);
                }
            }
        }

        debug!(account = %self.username, "Authenticating with password");
        match self
            .provider
            .authenticate(&self.username, &self.password)
            .await
        {
            Ok(issued) => {
                self.update_tokens(state, issued).await;
                Ok(())
            }
            Err(e) => {
                error!(account = %self.username, error = %e, "Authentication failed");
                Err(e)
            }
        }
    }

    async fn update_tokens(&self, state: &mut TokenBundle, issued: IssuedTokens) {
        state.apply(issued, Utc::now());
        match self.store.save(state).await {
            Ok(()) => info!(
                account = %self.username,
                expires_at = ?state.expires_at,
                "🔑 Tokens updated and saved"
            ),
            Err(e) => warn!(
                account = %self.username,
                path = %self.store.path().display(),
                error = %e,
                "Failed to persist tokens, continuing with in-memory session"
            ),
        }
    }
}
