//! Federated token file source
//!
//! Workload identity projects a service account token into the pod and the
//! kubelet rotates it in place. The file is re-read at most once every five
//! minutes; reads in between return the cached token.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CredentialsError;
use crate::settings::trim_newlines;

/// Conventional projected token path
pub const DEFAULT_FEDERATED_TOKEN_PATH: &str = "/var/run/secrets/azure/tokens/azure-identity-token";

/// Minimum interval between two reads of the token file
pub const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct CachedToken {
    token: String,
    read_at: Instant,
}

/// Reads and caches a federated token file
#[derive(Debug)]
pub struct FederatedTokenSource {
    path: PathBuf,
    cache: Mutex<Option<CachedToken>>,
}

impl FederatedTokenSource {
    /// Source reading from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// Token file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current token, reading the file when the cache is older than the refresh interval
    pub async fn token(&self) -> Result<String, CredentialsError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.read_at.elapsed() < TOKEN_REFRESH_INTERVAL {
                return Ok(cached.token.clone());
            }
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| CredentialsError::TokenFileUnreadable {
                path: self.path.clone(),
                source,
            })?;
        let token = trim_newlines(&raw).to_string();
        if token.is_empty() {
            return Err(CredentialsError::InvalidInput(format!(
                "federated token file {} is empty",
                self.path.display()
            )));
        }

        debug!(path = %self.path.display(), "read federated token file");
        *cache = Some(CachedToken {
            token: token.clone(),
            read_at: Instant::now(),
        });
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_token(file: &tempfile::NamedTempFile, token: &str) {
        std::fs::write(file.path(), token).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_is_cached_for_refresh_interval() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_token(&file, "T1\n");
        let source = FederatedTokenSource::new(file.path());

        assert_eq!(source.token().await.unwrap(), "T1");

        write_token(&file, "T2");
        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        assert_eq!(source.token().await.unwrap(), "T1");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(source.token().await.unwrap(), "T2");
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let source = FederatedTokenSource::new(dir.path().join("missing"));

        assert!(matches!(
            source.token().await,
            Err(CredentialsError::TokenFileUnreadable { .. })
        ));
    }
}
