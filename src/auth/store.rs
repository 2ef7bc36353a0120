//! Credential store
//!
//! Persists the token bundle as pretty-printed JSON, rewritten wholesale on
//! every update. No file lock is taken: one running instance per credential.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::{TokenBundle, MIN_ACCESS_TOKEN_LEN};

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the bundle, replacing any previous contents
    pub async fn save(&self, bundle: &TokenBundle) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(bundle)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        debug!(path = %self.path.display(), "💾 Tokens saved");
        Ok(())
    }

    /// Read the bundle back; rejects files without a usable access token
    pub async fn load(&self) -> Result<TokenBundle, StoreError> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Err(StoreError::NotFound(self.path.display().to_string()));
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let bundle: TokenBundle = serde_json::from_str(&raw)?;
        if !bundle.is_usable() {
            return Err(StoreError::InvalidAccessToken {
                min: MIN_ACCESS_TOKEN_LEN,
            });
        }
        info!(
            path = %self.path.display(),
            token = %format!("{}...", bundle.access_preview()),
            "📂 Access token loaded"
        );
        Ok(bundle)
    }
}
