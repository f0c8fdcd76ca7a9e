//! File-based challenge-response authentication
//!
//! Proves a caller can read a directory on the bridge host before it is handed
//! a token. The HTTP endpoint has no network-level caller identity, so the
//! proof is a one-time secret written to a file only local parties can read.
//!
//! Challenge flow:
//! 1. Caller asks without credentials; `AuthGate::evaluate` calls
//!    `ChallengeIssuer::issue`, which writes a random secret to `<uuid>.key`
//!    and registers it in the `SecretCache` with a TTL
//! 2. Caller receives the file path as seen from its side (`remote_path`)
//! 3. Caller reads the file and retries with `Authorization: Basic <secret>`
//! 4. `AuthGate::evaluate` takes the secret from the cache (single use)
//! 5. The sweeper deletes the file once the entry is consumed or expired

pub mod cleanup;
pub mod error;
pub mod gate;
pub mod issuer;
pub mod secret;

pub use cleanup::{delete_best_effort, delete_best_effort_async, evict_challenge_file};
pub use error::{Error, Result};
pub use gate::{AUTH_SCHEME, AuthGate, GateDecision, presented_secret};
pub use issuer::{
    CHALLENGE_FILE_SUFFIX, ChallengeIssuer, ChallengeSettings, IssuedChallenge, map_remote_path,
};
pub use secret::generate_secret;
