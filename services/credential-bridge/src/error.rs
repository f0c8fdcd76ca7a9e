//! Per-request error taxonomy and its HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use provider::ProviderError;
use thiserror::Error;

/// Failures of one token request.
///
/// A pending challenge is not an error; it is `BridgeResponse::Challenge`.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Caller input problem, e.g. missing `resource`
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Presented secret was malformed, unknown, reused or expired
    #[error("unauthorized")]
    Unauthorized,

    #[error("challenge issuance failed: {0}")]
    Issuance(#[from] file_challenge::Error),

    #[error("token provider failed: {0}")]
    Provider(#[from] ProviderError),
}

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::Unauthorized => StatusCode::UNAUTHORIZED,
            BridgeError::Issuance(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeError::Provider(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Value of the `error` field in the JSON body.
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::InvalidRequest(_) => "invalid_request",
            BridgeError::Unauthorized => "unauthorized",
            BridgeError::Issuance(_) => "internal_error",
            BridgeError::Provider(_) => "provider_error",
        }
    }

    /// Metrics label for the request outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            BridgeError::InvalidRequest(_) => "invalid_request",
            BridgeError::Unauthorized => "rejected",
            BridgeError::Issuance(_) => "issuance_error",
            BridgeError::Provider(_) => "provider_error",
        }
    }

    fn description(&self) -> String {
        match self {
            BridgeError::InvalidRequest(msg) => msg.clone(),
            BridgeError::Unauthorized => "presented secret is not valid".into(),
            // Host paths stay in the logs
            BridgeError::Issuance(_) => "failed to issue challenge".into(),
            BridgeError::Provider(e) => e.to_string(),
        }
    }
}

/// IMDS-style error body: `{"error": ..., "error_description": ...}`
pub(crate) fn error_body(status: StatusCode, code: &str, description: &str) -> Response {
    let body = serde_json::json!({
        "error": code,
        "error_description": description,
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        error_body(self.status(), self.error_code(), &self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            BridgeError::InvalidRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(BridgeError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            BridgeError::Issuance(file_challenge::Error::DuplicateSecret).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            BridgeError::Provider(ProviderError::Timeout(Duration::from_secs(1))).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn unauthorized_has_no_challenge_header() {
        let response = BridgeError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(
            response
                .headers()
                .get(axum::http::header::WWW_AUTHENTICATE)
                .is_none()
        );
        let json = body_json(response).await;
        assert_eq!(json["error"], "unauthorized");
    }

    #[tokio::test]
    async fn issuance_error_hides_host_paths() {
        let err = BridgeError::Issuance(file_challenge::Error::Io(
            "creating challenge directory /secret/host/dir: permission denied".into(),
        ));
        let json = body_json(err.into_response()).await;
        assert_eq!(json["error"], "internal_error");
        let description = json["error_description"].as_str().unwrap();
        assert!(!description.contains("/secret/host/dir"), "got: {description}");
    }

    #[tokio::test]
    async fn provider_error_carries_reason() {
        let err = BridgeError::Provider(ProviderError::Unavailable(
            "run 'az login' to sign in".into(),
        ));
        let json = body_json(err.into_response()).await;
        assert_eq!(json["error"], "provider_error");
        assert!(
            json["error_description"]
                .as_str()
                .unwrap()
                .contains("az login")
        );
    }

    #[test]
    fn outcomes_are_distinct() {
        let outcomes = [
            BridgeError::InvalidRequest("x".into()).outcome(),
            BridgeError::Unauthorized.outcome(),
            BridgeError::Issuance(file_challenge::Error::DuplicateSecret).outcome(),
            BridgeError::Provider(ProviderError::Rejected("x".into())).outcome(),
        ];
        let unique: std::collections::HashSet<_> = outcomes.iter().collect();
        assert_eq!(unique.len(), outcomes.len());
    }
}
