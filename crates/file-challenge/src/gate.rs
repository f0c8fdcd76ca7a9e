//! Per-request authentication decision
//!
//! Two paths, chosen by whether an `Authorization` header is present:
//! - absent (or blank): issue a new challenge
//! - present: take the presented secret from the cache, single use
//!
//! The gate holds no per-request state of its own; everything lives in the
//! secret cache.

use std::path::PathBuf;
use std::sync::Arc;

use secret_cache::SecretCache;
use tracing::debug;

use crate::error::Result;
use crate::issuer::{ChallengeIssuer, IssuedChallenge};

/// Scheme label callers wrap the secret in. A transport convention only.
pub const AUTH_SCHEME: &str = "Basic";

/// Outcome of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Challenge auth is turned off; the request is trusted as-is
    Bypassed,
    /// No credential presented; a new challenge was written
    ChallengeIssued(IssuedChallenge),
    /// The presented secret was live and is now consumed
    Authenticated,
    /// Malformed, unknown, reused or expired secret. Deliberately one variant.
    Rejected,
}

enum Mode {
    Disabled,
    Enforced {
        cache: Arc<SecretCache<PathBuf>>,
        issuer: ChallengeIssuer,
    },
}

pub struct AuthGate {
    mode: Mode,
}

impl AuthGate {
    /// Gate enforcing the file challenge, backed by `cache`.
    ///
    /// `issuer` must register into the same cache for issued secrets to
    /// validate.
    pub fn new(cache: Arc<SecretCache<PathBuf>>, issuer: ChallengeIssuer) -> Self {
        Self {
            mode: Mode::Enforced { cache, issuer },
        }
    }

    /// Gate that trusts every request (local network boundary deployments).
    pub fn disabled() -> Self {
        Self {
            mode: Mode::Disabled,
        }
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self.mode, Mode::Enforced { .. })
    }

    /// Number of challenges awaiting collection or cleanup.
    pub fn outstanding_challenges(&self) -> usize {
        match &self.mode {
            Mode::Disabled => 0,
            Mode::Enforced { cache, .. } => cache.len(),
        }
    }

    /// Decide what to do with a request carrying `authorization`.
    ///
    /// Returns `Err` only when a challenge could not be issued. A failed
    /// validation is `Ok(Rejected)` and is never retried here.
    pub async fn evaluate(&self, authorization: Option<&str>) -> Result<GateDecision> {
        let (cache, issuer) = match &self.mode {
            Mode::Disabled => return Ok(GateDecision::Bypassed),
            Mode::Enforced { cache, issuer } => (cache, issuer),
        };

        let Some(header) = authorization.filter(|h| !h.trim().is_empty()) else {
            let issued = issuer.issue().await?;
            return Ok(GateDecision::ChallengeIssued(issued));
        };

        match presented_secret(header).and_then(|secret| cache.take(secret)) {
            Some(path) => {
                debug!(path = %path.display(), "challenge secret accepted");
                Ok(GateDecision::Authenticated)
            }
            None => Ok(GateDecision::Rejected),
        }
    }
}

/// Extract the secret from `Basic <secret>`.
///
/// The remainder after the first space is the secret verbatim; it is not
/// base64-decoded and not split into user and password.
pub fn presented_secret(header: &str) -> Option<&str> {
    let (scheme, secret) = header.split_once(' ')?;
    if scheme != AUTH_SCHEME || secret.is_empty() {
        return None;
    }
    Some(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::evict_challenge_file;
    use crate::issuer::ChallengeSettings;
    use secret_cache::ManualClock;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(10);

    fn enforced_gate(dir: &std::path::Path) -> (AuthGate, Arc<SecretCache<PathBuf>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(SecretCache::with_clock(clock.clone()));
        let issuer = ChallengeIssuer::new(
            cache.clone(),
            ChallengeSettings {
                local_dir: dir.to_path_buf(),
                remote_dir: "/remote/tokens".into(),
                ttl: TTL,
            },
        );
        (AuthGate::new(cache.clone(), issuer), cache, clock)
    }

    async fn issue(gate: &AuthGate) -> (IssuedChallenge, String) {
        match gate.evaluate(None).await.unwrap() {
            GateDecision::ChallengeIssued(issued) => {
                let secret = std::fs::read_to_string(&issued.local_path).unwrap();
                (issued, secret)
            }
            other => panic!("expected a challenge, got {other:?}"),
        }
    }

    #[test]
    fn presented_secret_parsing() {
        assert_eq!(presented_secret("Basic abc+/="), Some("abc+/="));
        assert_eq!(presented_secret("Basic a b"), Some("a b"));
        assert_eq!(presented_secret("Bearer abc"), None);
        assert_eq!(presented_secret("basic abc"), None, "scheme is case-sensitive");
        assert_eq!(presented_secret("Basic"), None);
        assert_eq!(presented_secret("Basic "), None);
        assert_eq!(presented_secret("abc"), None);
    }

    #[tokio::test]
    async fn missing_header_issues_challenge_file() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, cache, _clock) = enforced_gate(dir.path());

        let (issued, secret) = issue(&gate).await;
        assert!(issued.remote_path.starts_with("/remote/tokens/"));
        assert!(secret.len() >= 43);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn blank_header_is_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, _cache, _clock) = enforced_gate(dir.path());

        let decision = gate.evaluate(Some("   ")).await.unwrap();
        assert!(matches!(decision, GateDecision::ChallengeIssued(_)));
    }

    #[tokio::test]
    async fn secret_authenticates_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, _cache, _clock) = enforced_gate(dir.path());
        let (_issued, secret) = issue(&gate).await;
        let header = format!("Basic {secret}");

        assert_eq!(
            gate.evaluate(Some(&header)).await.unwrap(),
            GateDecision::Authenticated
        );
        assert_eq!(
            gate.evaluate(Some(&header)).await.unwrap(),
            GateDecision::Rejected,
            "reused secret must be rejected"
        );
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected_without_new_challenge() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, cache, _clock) = enforced_gate(dir.path());
        let (_issued, secret) = issue(&gate).await;

        for header in [
            "Basic not-a-live-secret".to_string(),
            format!("Bearer {secret}"),
            "Basic".to_string(),
        ] {
            assert_eq!(
                gate.evaluate(Some(&header)).await.unwrap(),
                GateDecision::Rejected,
                "header {header:?}"
            );
        }
        assert_eq!(cache.len(), 1, "rejections must not issue or consume");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn expired_secret_is_rejected_and_file_removed_by_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, cache, clock) = enforced_gate(dir.path());
        let (issued, secret) = issue(&gate).await;

        clock.advance(TTL);
        assert_eq!(
            gate.evaluate(Some(&format!("Basic {secret}"))).await.unwrap(),
            GateDecision::Rejected
        );

        for eviction in cache.sweep() {
            evict_challenge_file(eviction);
        }
        assert!(!issued.local_path.exists());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn consumed_secret_file_is_removed_by_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, cache, _clock) = enforced_gate(dir.path());
        let (issued, secret) = issue(&gate).await;

        gate.evaluate(Some(&format!("Basic {secret}"))).await.unwrap();
        assert!(issued.local_path.exists(), "deletion only happens on sweep");

        for eviction in cache.sweep() {
            evict_challenge_file(eviction);
        }
        assert!(!issued.local_path.exists());
    }

    #[tokio::test]
    async fn disabled_gate_bypasses_without_touching_disk() {
        let gate = AuthGate::disabled();
        assert!(!gate.is_enforced());
        assert_eq!(gate.evaluate(None).await.unwrap(), GateDecision::Bypassed);
        assert_eq!(
            gate.evaluate(Some("Basic whatever")).await.unwrap(),
            GateDecision::Bypassed
        );
        assert_eq!(gate.outstanding_challenges(), 0);
    }

    #[tokio::test]
    async fn issuance_failure_is_an_error_not_a_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("tokens");
        std::fs::write(&blocker, "").unwrap();
        let (gate, _cache, _clock) = enforced_gate(&blocker);

        assert!(gate.evaluate(None).await.is_err());
    }
}
