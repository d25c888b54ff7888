//! Persisted channel credential

use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Plain-text token file. Every operation is best effort.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the token; a missing, unreadable or blank file yields `None`
    pub async fn load(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => {
                let token = data.trim();
                if token.is_empty() {
                    warn!("[ONBOARD] Ignoring empty token file {}", self.path.display());
                    None
                } else {
                    info!("[ONBOARD] Loaded persisted token from {}", self.path.display());
                    Some(token.to_string())
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("[ONBOARD] Failed to read token {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Write the token, logging failures
    pub async fn save(&self, token: &str) {
        if let Err(e) = self.write(token).await {
            warn!("[ONBOARD] Failed to persist token to {}: {}", self.path.display(), e);
        }
    }

    async fn write(&self, token: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, token).await
    }

    /// Delete the token file; a missing file is fine
    pub async fn clear(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!("[ONBOARD] Deleted token file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("[ONBOARD] Failed to delete token {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested/device_token"));

        assert_eq!(store.load().await, None);
        store.save("jwt-abc").await;
        assert_eq!(store.load().await, Some("jwt-abc".into()));

        store.clear().await;
        assert!(!store.path().exists());
        assert_eq!(store.load().await, None);
        // Second clear is a no-op
        store.clear().await;
    }

    #[tokio::test]
    async fn test_whitespace_only_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_token");
        std::fs::write(&path, " \n").unwrap();
        assert_eq!(TokenStore::new(path).load().await, None);
    }

    #[tokio::test]
    async fn test_trailing_newline_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_token");
        std::fs::write(&path, "jwt-xyz\n").unwrap();
        assert_eq!(TokenStore::new(path).load().await, Some("jwt-xyz".into()));
    }
}
