//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. Every table and key
//! is optional. The static provider token is loaded from BRIDGE_STATIC_TOKEN
//! or token_file, never stored in the TOML directly.

use common::Secret;
use file_challenge::ChallengeSettings;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when none is named.
pub const DEFAULT_CONFIG_FILE: &str = "local-credential-bridge.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub challenge: ChallengeConfig,
    pub provider: ProviderConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 40342)),
            max_connections: 1000,
        }
    }
}

/// File challenge settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    pub enabled: bool,
    /// Tokens directory on this host. `~`, `$VAR`, `${VAR}` and `%VAR%` are expanded.
    pub local_tokens_path: String,
    /// The same directory as the caller sees it
    pub remote_tokens_path: String,
    pub timeout_secs: u64,
    pub sweep_interval_ms: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_tokens_path: "~/.LocalCredentialBridgeTokens".into(),
            remote_tokens_path: "/var/opt/azcmagent/tokens".into(),
            timeout_secs: 10,
            sweep_interval_ms: 1000,
        }
    }
}

impl ChallengeConfig {
    pub fn settings(&self) -> ChallengeSettings {
        ChallengeSettings {
            local_dir: PathBuf::from(&self.local_tokens_path),
            remote_dir: self.remote_tokens_path.clone(),
            ttl: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Which token provider backs the endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    AzureCli,
    Static,
}

/// Token provider settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Command prefix for the CLI provider, e.g. `["az"]`
    pub command: Vec<String>,
    pub tenant: Option<String>,
    pub timeout_secs: u64,
    /// Path to a file holding the static token (alternative to BRIDGE_STATIC_TOKEN)
    pub token_file: Option<PathBuf>,
    pub token_lifetime_secs: u64,
    #[serde(skip)]
    pub static_token: Option<Secret<String>>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::AzureCli,
            command: provider::default_az_command(),
            tenant: None,
            timeout_secs: 30,
            token_file: None,
            token_lifetime_secs: 3600,
            static_token: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.finalize()
    }

    /// Built-in defaults with environment variables applied.
    pub fn from_env() -> common::Result<Self> {
        Config::default().finalize()
    }

    /// Resolve config file path from CLI arg, CONFIG_PATH env var, or the
    /// default file in the working directory. `None` means run on defaults.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return Some(PathBuf::from(p));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.is_file().then_some(default)
    }

    fn finalize(mut self) -> common::Result<Self> {
        self.apply_env_overrides()?;
        self.challenge.local_tokens_path = expand_path(&self.challenge.local_tokens_path);
        if self.provider.kind == ProviderKind::Static {
            self.provider.static_token = load_static_token(self.provider.token_file.as_deref())?;
        }
        self.validate()?;
        Ok(self)
    }

    fn apply_env_overrides(&mut self) -> common::Result<()> {
        if let Some(addr) = env_var("BRIDGE_LISTEN_ADDR") {
            self.server.listen_addr = addr.parse().map_err(|e| {
                common::Error::Config(format!("BRIDGE_LISTEN_ADDR {addr:?}: {e}"))
            })?;
        }
        if let Some(flag) = env_var("BRIDGE_USE_FILE_CHALLENGE_AUTH") {
            self.challenge.enabled = parse_bool(&flag).ok_or_else(|| {
                common::Error::Config(format!(
                    "BRIDGE_USE_FILE_CHALLENGE_AUTH must be true or false, got: {flag}"
                ))
            })?;
        }
        if let Some(path) = env_var("BRIDGE_LOCAL_TOKENS_PATH") {
            self.challenge.local_tokens_path = path;
        }
        if let Some(path) = env_var("BRIDGE_REMOTE_TOKENS_PATH") {
            self.challenge.remote_tokens_path = path;
        }
        if let Some(secs) = env_var("BRIDGE_CHALLENGE_TIMEOUT_SECS") {
            self.challenge.timeout_secs = secs.parse().map_err(|e| {
                common::Error::Config(format!("BRIDGE_CHALLENGE_TIMEOUT_SECS {secs:?}: {e}"))
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.challenge.timeout_secs == 0 {
            return Err(common::Error::Config(
                "challenge timeout_secs must be greater than 0".into(),
            ));
        }
        if self.challenge.sweep_interval_ms == 0 {
            return Err(common::Error::Config(
                "sweep_interval_ms must be greater than 0".into(),
            ));
        }
        if self.challenge.enabled {
            if self.challenge.local_tokens_path.trim().is_empty() {
                return Err(common::Error::Config(
                    "local_tokens_path must not be empty when challenge auth is enabled".into(),
                ));
            }
            if self.challenge.remote_tokens_path.trim().is_empty() {
                return Err(common::Error::Config(
                    "remote_tokens_path must not be empty when challenge auth is enabled".into(),
                ));
            }
        }
        if self.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "provider timeout_secs must be greater than 0".into(),
            ));
        }
        match self.provider.kind {
            ProviderKind::AzureCli => {
                if self.provider.command.first().is_none_or(|c| c.trim().is_empty()) {
                    return Err(common::Error::Config(
                        "provider command must name a program".into(),
                    ));
                }
            }
            ProviderKind::Static => {
                if self.provider.static_token.is_none() {
                    return Err(common::Error::Config(
                        "static provider needs BRIDGE_STATIC_TOKEN or token_file".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Static token resolution order:
/// 1. BRIDGE_STATIC_TOKEN env var
/// 2. token_file path from config
fn load_static_token(token_file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Some(token) = env_var("BRIDGE_STATIC_TOKEN") {
        return Ok(Some(Secret::new(token)));
    }
    let Some(path) = token_file else {
        return Ok(None);
    };
    let token = std::fs::read_to_string(path).map_err(|e| {
        common::Error::Config(format!("failed to read token_file {}: {e}", path.display()))
    })?;
    let token = token.trim().to_owned();
    Ok((!token.is_empty()).then(|| Secret::new(token)))
}

/// Expand a leading `~` and `$VAR`, `${VAR}`, `%VAR%` references.
///
/// Unknown variables are left verbatim.
pub fn expand_path(raw: &str) -> String {
    let with_home = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with(['/', '\\']) => match dirs::home_dir() {
            Some(home) => format!("{}{rest}", home.display()),
            None => raw.to_string(),
        },
        _ => raw.to_string(),
    };
    expand_env_vars(&with_home)
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(['$', '%']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let resolved = variable_at(tail)
            .and_then(|(name, len)| std::env::var(name).ok().map(|value| (value, len)));
        match resolved {
            Some((value, len)) => {
                out.push_str(&value);
                rest = &tail[len..];
            }
            None => {
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Variable reference at the start of `s`: its name and byte length.
fn variable_at(s: &str) -> Option<(&str, usize)> {
    let (name, len) = if let Some(body) = s.strip_prefix("${") {
        let end = body.find('}')?;
        (&body[..end], end + 3)
    } else if let Some(body) = s.strip_prefix('%') {
        let end = body.find('%')?;
        (&body[..end], end + 2)
    } else {
        let body = s.strip_prefix('$')?;
        let end = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(body.len());
        (&body[..end], end + 1)
    };
    // Windows names such as ProgramFiles(x86) carry parentheses
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')'));
    valid.then_some((name, len))
}
