//! Static provider: hands out one configured token for every resource.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;

use crate::{AccessToken, TokenProvider};

/// Provider returning a fixed token with a rolling expiry of now + `lifetime`.
pub struct StaticProvider {
    token: Secret<String>,
    lifetime: Duration,
}

impl StaticProvider {
    pub fn new(token: Secret<String>, lifetime: Duration) -> Self {
        Self { token, lifetime }
    }
}

impl TokenProvider for StaticProvider {
    fn id(&self) -> &str {
        "static"
    }

    fn get_token<'a>(
        &'a self,
        _resource: &'a str,
    ) -> Pin<Box<dyn Future<Output = crate::Result<AccessToken>> + Send + 'a>> {
        Box::pin(async move {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            Ok(AccessToken {
                token: self.token.clone(),
                expires_on: now + self.lifetime.as_secs(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_configured_token_with_future_expiry() {
        let provider = StaticProvider::new(
            Secret::new("at_static".to_string()),
            Duration::from_secs(3600),
        );
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        let token = provider.get_token("https://vault.azure.net").await.unwrap();
        assert_eq!(token.token.expose(), "at_static");
        assert!(token.expires_on >= now + 3600);
        assert!(token.expires_on <= now + 3601);
        assert_eq!(provider.id(), "static");
    }
}
