//! Azure CLI provider
//!
//! Runs `az account get-access-token` for each request so tokens come from
//! whatever identity is signed in on the host (`az login`). The CLI keeps its
//! own token cache, so repeated calls are cheap after the first.
//!
//! Requires Azure CLI 2.54+ for the `expires_on` (unix seconds) output field.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use common::Secret;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::{AccessToken, ProviderError, Result, TokenProvider};

/// Settings for the CLI provider.
#[derive(Debug, Clone)]
pub struct AzureCliSettings {
    /// Program and leading arguments, e.g. `["az"]` or `["wsl", "az"]`
    pub command: Vec<String>,
    /// Optional `--tenant` to request tokens from
    pub tenant: Option<String>,
    /// Upper bound on a single CLI invocation
    pub timeout: Duration,
}

/// Platform default for invoking the CLI.
pub fn default_az_command() -> Vec<String> {
    if cfg!(windows) {
        vec!["az.cmd".to_string()]
    } else {
        vec!["az".to_string()]
    }
}

pub struct AzureCliProvider {
    program: String,
    leading_args: Vec<String>,
    tenant: Option<String>,
    timeout: Duration,
}

impl AzureCliProvider {
    pub fn new(settings: AzureCliSettings) -> Result<Self> {
        let mut command = settings.command.into_iter();
        let program = command
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ProviderError::Unavailable("Azure CLI command is empty".into()))?;

        if let Some(tenant) = &settings.tenant {
            let well_formed = !tenant.starts_with('-')
                && !tenant.is_empty()
                && tenant
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
            if !well_formed {
                return Err(ProviderError::Unavailable(format!(
                    "invalid tenant id: {tenant:?}"
                )));
            }
        }

        Ok(Self {
            program,
            leading_args: command.collect(),
            tenant: settings.tenant,
            timeout: settings.timeout,
        })
    }
}

impl TokenProvider for AzureCliProvider {
    fn id(&self) -> &str {
        "azure_cli"
    }

    fn get_token<'a>(
        &'a self,
        resource: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AccessToken>> + Send + 'a>> {
        Box::pin(self.fetch(resource))
    }
}

impl AzureCliProvider {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn fetch(&self, resource: &str) -> Result<AccessToken> {
        let resource = scope_to_resource(resource);
        validate_resource(resource)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args([
                "account",
                "get-access-token",
                "--output",
                "json",
                "--resource",
                resource,
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(tenant) = &self.tenant {
            cmd.args(["--tenant", tenant]);
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::Unavailable(format!(
                    "{} not found on PATH",
                    self.program
                )));
            }
            Ok(Err(e)) => {
                return Err(ProviderError::Unavailable(format!(
                    "failed to run {}: {e}",
                    self.program
                )));
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Azure CLI timed out");
                return Err(ProviderError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(status = %output.status, "Azure CLI exited with failure");
            return Err(classify_failure(&stderr));
        }

        parse_cli_output(&output.stdout)
    }
}

/// Shape of `az account get-access-token --output json`.
#[derive(Deserialize)]
struct CliToken {
    #[serde(rename = "accessToken")]
    access_token: String,
    expires_on: Option<u64>,
}

/// Parse the CLI's JSON output into an `AccessToken`.
pub(crate) fn parse_cli_output(stdout: &[u8]) -> Result<AccessToken> {
    let parsed: CliToken = serde_json::from_slice(stdout)
        .map_err(|e| ProviderError::InvalidResponse(format!("Azure CLI output: {e}")))?;

    if parsed.access_token.is_empty() {
        return Err(ProviderError::InvalidResponse(
            "Azure CLI returned an empty access token".into(),
        ));
    }
    let expires_on = parsed.expires_on.ok_or_else(|| {
        ProviderError::InvalidResponse(
            "Azure CLI output lacks expires_on; Azure CLI 2.54 or later is required".into(),
        )
    })?;

    Ok(AccessToken {
        token: Secret::new(parsed.access_token),
        expires_on,
    })
}

/// Map a failed CLI run to a provider error from its stderr.
pub(crate) fn classify_failure(stderr: &str) -> ProviderError {
    if stderr.contains("az login") {
        return ProviderError::Unavailable("Azure CLI is not signed in; run `az login`".into());
    }
    let first_line = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Azure CLI exited with an error");
    ProviderError::Rejected(first_line.to_string())
}

/// Turn an OAuth scope (`<resource>/.default`) into the resource the CLI expects.
pub(crate) fn scope_to_resource(resource: &str) -> &str {
    resource.strip_suffix("/.default").unwrap_or(resource)
}

/// Reject resources the CLI would misparse, before anything is spawned.
fn validate_resource(resource: &str) -> Result<()> {
    let valid = !resource.is_empty()
        && !resource.starts_with('-')
        && resource
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/'));
    if valid {
        Ok(())
    } else {
        Err(ProviderError::Rejected(format!(
            "resource {resource:?} contains characters the Azure CLI does not accept"
        )))
    }
}
