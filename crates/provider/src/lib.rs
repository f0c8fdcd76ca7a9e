//! Token provider abstraction
//!
//! Defines the `TokenProvider` trait that decouples the bridge from how host
//! credentials are resolved. The bridge calls `get_token` exactly once per
//! authenticated request and never caches or retries; any retry or caching
//! policy belongs to the implementation.
//!
//! - `AzureCliProvider` shells out to `az account get-access-token`, reusing
//!   whatever identity is signed in on the host
//! - `StaticProvider` returns a configured token (development, tests)

pub mod azure_cli;
pub mod fixed;

pub use azure_cli::{AzureCliProvider, AzureCliSettings, default_az_command};
pub use fixed::StaticProvider;

use common::Secret;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Bearer token for one resource.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: Secret<String>,
    /// Absolute expiry, unix seconds
    pub expires_on: u64,
}

/// Errors from provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// No usable credential on the host (tool missing, not signed in)
    #[error("credential source unavailable: {0}")]
    Unavailable(String),

    /// The credential source refused to issue a token for the resource
    #[error("token request rejected: {0}")]
    Rejected(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "unavailable",
            ProviderError::Rejected(_) => "rejected",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Timeout(_) => "timeout",
        }
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Source of bearer tokens for a resource/audience.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn TokenProvider>`).
pub trait TokenProvider: Send + Sync {
    /// Identifier for logging and health reporting (e.g. "azure_cli", "static")
    fn id(&self) -> &str;

    /// Obtain a token for `resource`. May be slow; may fail.
    fn get_token<'a>(
        &'a self,
        resource: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AccessToken>> + Send + 'a>>;
}
