//! Server configuration loading
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file
//! (path from `LEMON_EMAIL_CONFIG`), then environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://app.xn--lemn-sqa.com/api";

pub const ENV_CONFIG_PATH: &str = "LEMON_EMAIL_CONFIG";
pub const ENV_API_KEY: &str = "LEMON_EMAIL_API_KEY";
pub const ENV_API_BASE_URL: &str = "LEMON_EMAIL_API_BASE_URL";
pub const ENV_HOST: &str = "LEMON_EMAIL_HOST";
pub const ENV_PORT: &str = "PORT";

/// Root configuration structure
#[derive(Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Clone, Deserialize)]
pub struct ProviderConfig {
    /// Credential sent in the `X-Auth-APIKey` header
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: default_api_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_api_base_url() -> String { DEFAULT_API_BASE_URL.into() }
fn default_timeout_secs() -> u64 { 30 }
fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8000 }

// Keep the credential out of logs.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("provider", &self.provider)
            .field("http", &self.http)
            .finish()
    }
}

impl Config {
    /// Load from the optional config file, then apply process environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) if !path.is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Overlay values from an environment lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_API_KEY) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = get(ENV_API_BASE_URL) {
            self.provider.api_base_url = url;
        }
        if let Some(host) = get(ENV_HOST) {
            self.http.host = host;
        }
        if let Some(port) = get(ENV_PORT) {
            self.http.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {ENV_PORT} value: {port}"))?;
        }
        Ok(())
    }

    /// Configured credential, if any non-empty one is present
    pub fn api_key(&self) -> Option<&str> {
        self.provider
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.http.host, self.http.port);
        addr.parse()
            .with_context(|| format!("Invalid bind address: {addr}"))
    }
}
