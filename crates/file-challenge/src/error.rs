//! Error types for challenge issuance

/// Errors from challenge issuance.
///
/// Validation outcomes are not errors; see `GateDecision`. Anything here means
/// the host could not produce a challenge (e.g. an unwritable tokens path).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("challenge I/O error: {0}")]
    Io(String),

    #[error("generated secret collides with a live challenge")]
    DuplicateSecret,
}

/// Result alias for challenge operations.
pub type Result<T> = std::result::Result<T, Error>;
