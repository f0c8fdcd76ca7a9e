//! Best-effort removal of challenge files
//!
//! Cleanup failures are never surfaced: a file that is already gone or cannot
//! be removed is logged and forgotten. Authorization never depends on the file
//! still existing.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use secret_cache::Eviction;
use tracing::{debug, warn};

/// Remove `path`, swallowing every error. Returns whether a file was removed.
pub fn delete_best_effort(path: &Path) -> bool {
    log_removal(path, std::fs::remove_file(path))
}

/// Async form of [`delete_best_effort`] for use on request tasks.
pub async fn delete_best_effort_async(path: &Path) -> bool {
    log_removal(path, tokio::fs::remove_file(path).await)
}

fn log_removal(path: &Path, result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "deleted challenge file");
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "challenge file already gone");
            false
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to delete challenge file");
            false
        }
    }
}

/// Eviction handler for the secret cache sweeper.
pub fn evict_challenge_file(eviction: Eviction<PathBuf>) {
    debug!(
        reason = eviction.reason.label(),
        path = %eviction.value.display(),
        "evicting challenge"
    );
    delete_best_effort(&eviction.value);
}
