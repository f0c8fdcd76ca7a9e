//! Challenge issuance
//!
//! Writes a fresh secret to a uniquely named file in the local tokens
//! directory and registers it in the secret cache. The caller is told where
//! the file lives on *its* side of the mount, which may use a different path
//! syntax than the bridge host.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secret_cache::SecretCache;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::cleanup::delete_best_effort_async;
use crate::error::{Error, Result};
use crate::secret::generate_secret;

/// Suffix of every challenge file name.
pub const CHALLENGE_FILE_SUFFIX: &str = ".key";

/// Where challenges are written and how long they stay valid.
#[derive(Debug, Clone)]
pub struct ChallengeSettings {
    /// Tokens directory as seen by the bridge process
    pub local_dir: PathBuf,
    /// The same directory as seen by the calling process
    pub remote_dir: String,
    /// Lifetime of each issued secret
    pub ttl: Duration,
}

/// Pointer to a freshly issued challenge. Never carries the secret itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub file_name: String,
    pub local_path: PathBuf,
    pub remote_path: String,
}

pub struct ChallengeIssuer {
    cache: Arc<SecretCache<PathBuf>>,
    settings: ChallengeSettings,
}

impl ChallengeIssuer {
    pub fn new(cache: Arc<SecretCache<PathBuf>>, settings: ChallengeSettings) -> Self {
        Self { cache, settings }
    }

    /// Issue a new challenge.
    ///
    /// Creates the local directory if needed, writes the secret as the whole
    /// content of `<uuid>.key` and registers it with the configured TTL. The
    /// file is written before the cache entry exists, so a caller can never
    /// hold a pointer to a secret that is not yet on disk.
    pub async fn issue(&self) -> Result<IssuedChallenge> {
        let dir = &self.settings.local_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            Error::Io(format!(
                "creating challenge directory {}: {e}",
                dir.display()
            ))
        })?;

        let secret = generate_secret();
        let file_name = format!("{}{CHALLENGE_FILE_SUFFIX}", Uuid::new_v4());
        let local_path = dir.join(&file_name);

        if let Err(e) = write_new_file(&local_path, secret.expose()).await {
            if e.kind() != std::io::ErrorKind::AlreadyExists {
                delete_best_effort_async(&local_path).await;
            }
            return Err(Error::Io(format!(
                "writing challenge file {}: {e}",
                local_path.display()
            )));
        }

        if !self
            .cache
            .put(secret.expose().clone(), local_path.clone(), self.settings.ttl)
        {
            delete_best_effort_async(&local_path).await;
            return Err(Error::DuplicateSecret);
        }

        let remote_path = map_remote_path(&self.settings.remote_dir, &file_name);
        debug!(
            file_name = %file_name,
            remote_path = %remote_path,
            ttl_secs = self.settings.ttl.as_secs(),
            "challenge issued"
        );

        Ok(IssuedChallenge {
            file_name,
            local_path,
            remote_path,
        })
    }
}

/// Create `path` (failing if it exists) and write `contents` as its body.
async fn write_new_file(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await
}

/// Join `remote_dir` and `file_name` using the remote side's path syntax.
///
/// A remote directory containing `/` is treated as a Unix path and any
/// backslashes are normalized to `/`. Otherwise the caller is assumed to be
/// on Windows and `\` is used.
pub fn map_remote_path(remote_dir: &str, file_name: &str) -> String {
    if remote_dir.is_empty() {
        return file_name.to_string();
    }

    let unix_style = remote_dir.contains('/');
    let separator = if unix_style { '/' } else { '\\' };
    let trimmed = remote_dir.trim_end_matches(['/', '\\']);
    let dir = if unix_style {
        trimmed.replace('\\', "/")
    } else {
        trimmed.to_string()
    };

    format!("{dir}{separator}{file_name}")
}
