//! Token endpoint
//!
//! Validates the request, runs the file challenge gate, and on success asks
//! the token provider exactly once. Returns typed outcomes; the HTTP mapping
//! lives in the `IntoResponse` impls.

use crate::error::{BridgeError, error_body};
use crate::metrics::{self, ServiceMetrics};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use file_challenge::{AuthGate, GateDecision};
use provider::TokenProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Path of the IMDS-compatible token endpoint.
pub const TOKEN_PATH: &str = "/metadata/identity/oauth2/token";

/// Query string of a token request. Unknown parameters (`api-version`) are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub resource: Option<String>,
}

/// Successful token body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_on: u64,
    pub resource: String,
}

#[derive(Debug)]
pub enum BridgeResponse {
    Token(TokenResponse),
    /// A challenge file was written; the caller must read it and retry
    Challenge { remote_path: String },
}

impl BridgeResponse {
    fn outcome(&self) -> &'static str {
        match self {
            BridgeResponse::Token(_) => "token",
            BridgeResponse::Challenge { .. } => "challenge_issued",
        }
    }
}

impl IntoResponse for BridgeResponse {
    fn into_response(self) -> Response {
        match self {
            BridgeResponse::Token(token) => (StatusCode::OK, axum::Json(token)).into_response(),
            BridgeResponse::Challenge { remote_path } => {
                let value = match HeaderValue::from_str(&format!("TokenFile={remote_path}")) {
                    Ok(value) => value,
                    Err(e) => {
                        error!(error = %e, remote_path = %remote_path, "challenge path is not a valid header value");
                        return error_body(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "internal_error",
                            "failed to issue challenge",
                        );
                    }
                };
                let mut response = error_body(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "read the file named in WWW-Authenticate and retry with Authorization: Basic <contents>",
                );
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
                response
            }
        }
    }
}

pub struct BridgeEndpoint {
    gate: AuthGate,
    provider: Arc<dyn TokenProvider>,
}

impl BridgeEndpoint {
    pub fn new(gate: AuthGate, provider: Arc<dyn TokenProvider>) -> Self {
        Self { gate, provider }
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Handle one token request.
    ///
    /// A blank `resource` fails before the gate runs, so it never writes a
    /// challenge file. The provider is called only after the gate authenticates
    /// or bypasses, and at most once.
    pub async fn handle(
        &self,
        resource: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<BridgeResponse, BridgeError> {
        let Some(resource) = resource.filter(|r| !r.trim().is_empty()) else {
            return Err(BridgeError::InvalidRequest(
                "the resource query parameter is required".into(),
            ));
        };

        match self.gate.evaluate(authorization).await? {
            GateDecision::ChallengeIssued(issued) => {
                metrics::record_challenge_issued();
                info!(file_name = %issued.file_name, "issued file challenge");
                return Ok(BridgeResponse::Challenge {
                    remote_path: issued.remote_path,
                });
            }
            GateDecision::Rejected => return Err(BridgeError::Unauthorized),
            GateDecision::Authenticated | GateDecision::Bypassed => {}
        }

        let token = self.provider.get_token(resource).await?;
        Ok(BridgeResponse::Token(TokenResponse {
            access_token: token.token.expose().clone(),
            expires_on: token.expires_on,
            resource: resource.to_string(),
        }))
    }
}

/// Serve one token request: run the endpoint, log, record metrics, render.
///
/// `query` is `Err` when the query string could not be parsed; that is
/// reported like any other invalid request.
#[instrument(skip_all, fields(request_id = %request_id, resource = tracing::field::Empty))]
pub async fn serve_token_request(
    endpoint: &BridgeEndpoint,
    counters: &ServiceMetrics,
    query: Result<TokenQuery, BridgeError>,
    authorization: Option<&str>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    counters.requests_total.fetch_add(1, Ordering::Relaxed);

    let result = match query {
        Ok(query) => {
            if let Some(resource) = query.resource.as_deref() {
                tracing::Span::current().record("resource", resource);
            }
            endpoint
                .handle(query.resource.as_deref(), authorization)
                .await
        }
        Err(e) => Err(e),
    };

    let outcome = match &result {
        Ok(response) => response.outcome(),
        Err(e) => {
            match e {
                BridgeError::InvalidRequest(msg) => debug!(reason = %msg, "invalid token request"),
                BridgeError::Unauthorized => info!("rejected presented challenge secret"),
                BridgeError::Issuance(err) => {
                    error!(error = %err, "failed to issue file challenge")
                }
                BridgeError::Provider(err) => {
                    metrics::record_provider_error(err.kind());
                    warn!(error = %err, provider = endpoint.provider_id(), "token provider failed");
                }
            }
            if e.status().is_server_error() {
                counters.errors_total.fetch_add(1, Ordering::Relaxed);
            }
            e.outcome()
        }
    };
    metrics::record_request(outcome, started.elapsed().as_secs_f64());

    match result {
        Ok(response) => response.into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use file_challenge::{ChallengeIssuer, ChallengeSettings};
    use provider::{AccessToken, ProviderError, StaticProvider};
    use secret_cache::SecretCache;
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every resource it is asked for and optionally fails.
    struct RecordingProvider {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingProvider {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TokenProvider for RecordingProvider {
        fn id(&self) -> &str {
            "recording"
        }

        fn get_token<'a>(
            &'a self,
            resource: &'a str,
        ) -> Pin<Box<dyn Future<Output = provider::Result<AccessToken>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(resource.to_string());
                if self.fail {
                    return Err(ProviderError::Unavailable("not signed in".into()));
                }
                Ok(AccessToken {
                    token: common::Secret::new(format!("token-for-{resource}")),
                    expires_on: 1_900_000_000,
                })
            })
        }
    }

    fn enforced(
        dir: &std::path::Path,
        provider: Arc<dyn TokenProvider>,
    ) -> (BridgeEndpoint, Arc<SecretCache<PathBuf>>) {
        let cache = Arc::new(SecretCache::new());
        let issuer = ChallengeIssuer::new(
            cache.clone(),
            ChallengeSettings {
                local_dir: dir.to_path_buf(),
                remote_dir: "/remote/tokens".into(),
                ttl: Duration::from_secs(10),
            },
        );
        let gate = AuthGate::new(cache.clone(), issuer);
        (BridgeEndpoint::new(gate, provider), cache)
    }

    fn challenge_path(response: BridgeResponse) -> String {
        match response {
            BridgeResponse::Challenge { remote_path } => remote_path,
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    fn secret_for(dir: &std::path::Path, remote_path: &str) -> String {
        let file_name = remote_path.rsplit('/').next().unwrap();
        std::fs::read_to_string(dir.join(file_name)).unwrap()
    }

    #[tokio::test]
    async fn blank_resource_fails_before_gate() {
        let dir = tempfile::tempdir().unwrap();
        let provider = RecordingProvider::new(false);
        let (endpoint, cache) = enforced(dir.path(), provider.clone());

        for resource in [None, Some(""), Some("   ")] {
            let err = endpoint.handle(resource, None).await.unwrap_err();
            assert!(matches!(err, BridgeError::InvalidRequest(_)), "{resource:?}");
        }

        assert!(cache.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn challenge_then_token_calls_provider_once() {
        let dir = tempfile::tempdir().unwrap();
        let provider = RecordingProvider::new(false);
        let (endpoint, _cache) = enforced(dir.path(), provider.clone());

        let remote_path = challenge_path(
            endpoint
                .handle(Some("https://vault.azure.net"), None)
                .await
                .unwrap(),
        );
        assert!(remote_path.starts_with("/remote/tokens/"));
        assert!(provider.calls().is_empty(), "challenge must not call provider");

        let secret = secret_for(dir.path(), &remote_path);
        let response = endpoint
            .handle(
                Some("https://vault.azure.net"),
                Some(&format!("Basic {secret}")),
            )
            .await
            .unwrap();

        match response {
            BridgeResponse::Token(token) => {
                assert_eq!(token.access_token, "token-for-https://vault.azure.net");
                assert_eq!(token.resource, "https://vault.azure.net");
                assert_eq!(token.expires_on, 1_900_000_000);
            }
            other => panic!("expected token, got {other:?}"),
        }
        assert_eq!(provider.calls(), vec!["https://vault.azure.net".to_string()]);
    }

    #[tokio::test]
    async fn rejected_secret_issues_nothing_and_skips_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = RecordingProvider::new(false);
        let (endpoint, cache) = enforced(dir.path(), provider.clone());

        let err = endpoint
            .handle(Some("https://management.azure.com"), Some("Basic not-issued"))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Unauthorized));
        assert!(cache.is_empty(), "rejection must not issue a new challenge");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_surfaces_after_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let provider = RecordingProvider::new(true);
        let (endpoint, _cache) = enforced(dir.path(), provider.clone());

        let remote_path =
            challenge_path(endpoint.handle(Some("api://app"), None).await.unwrap());
        let secret = secret_for(dir.path(), &remote_path);

        let err = endpoint
            .handle(Some("api://app"), Some(&format!("Basic {secret}")))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Provider(ProviderError::Unavailable(_))));
        assert_eq!(provider.calls().len(), 1, "provider is never retried");

        // The secret was consumed even though the provider failed
        let err = endpoint
            .handle(Some("api://app"), Some(&format!("Basic {secret}")))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Unauthorized));
    }

    #[tokio::test]
    async fn resource_is_echoed_verbatim() {
        let endpoint = BridgeEndpoint::new(
            AuthGate::disabled(),
            Arc::new(StaticProvider::new(
                common::Secret::new("tok".to_string()),
                Duration::from_secs(60),
            )),
        );

        let response = endpoint
            .handle(Some(" https://storage.azure.com/ "), None)
            .await
            .unwrap();
        match response {
            BridgeResponse::Token(token) => {
                assert_eq!(token.resource, " https://storage.azure.com/ ");
                assert_eq!(token.access_token, "tok");
            }
            other => panic!("expected token, got {other:?}"),
        }
        assert_eq!(endpoint.provider_id(), "static");
    }

    #[tokio::test]
    async fn challenge_response_sets_header_without_secret() {
        let response = BridgeResponse::Challenge {
            remote_path: "/remote/tokens/abc.key".into(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "TokenFile=/remote/tokens/abc.key"
        );
    }

    #[tokio::test]
    async fn unencodable_challenge_path_is_internal_error() {
        let response = BridgeResponse::Challenge {
            remote_path: "/remote/tokens/bad\nname.key".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }
}
