//! Token provider construction from configuration

use crate::config::{ProviderConfig, ProviderKind};
use provider::{AzureCliProvider, AzureCliSettings, StaticProvider, TokenProvider};
use std::sync::Arc;
use std::time::Duration;

/// Build the single provider the endpoint will call.
pub fn build_provider(config: &ProviderConfig) -> anyhow::Result<Arc<dyn TokenProvider>> {
    match config.kind {
        ProviderKind::AzureCli => {
            let provider = AzureCliProvider::new(AzureCliSettings {
                command: config.command.clone(),
                tenant: config.tenant.clone(),
                timeout: Duration::from_secs(config.timeout_secs),
            })?;
            Ok(Arc::new(provider))
        }
        ProviderKind::Static => {
            let token = config
                .static_token
                .clone()
                .ok_or_else(|| anyhow::anyhow!("static provider configured without a token"))?;
            Ok(Arc::new(StaticProvider::new(
                token,
                Duration::from_secs(config.token_lifetime_secs),
            )))
        }
    }
}
