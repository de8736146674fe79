//! Consumer identity and its configuration sources.
//!
//! Resolution order (later overrides earlier):
//! 1. Built-in defaults (provider root URL, empty credentials)
//! 2. Environment (`FAITHLIFE_CONSUMER_TOKEN`, `FAITHLIFE_CONSUMER_SECRET`,
//!    `FAITHLIFE_OAUTH_ROOT_URL`)
//! 3. Explicit values (config file or CLI flags)

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OAuthError, Result};

/// Default provider root URL.
pub const DEFAULT_ROOT_URL: &str = "https://auth.logos.com/oauth";

/// Environment variable holding the consumer token.
pub const ENV_CONSUMER_TOKEN: &str = "FAITHLIFE_CONSUMER_TOKEN";

/// Environment variable holding the consumer secret.
pub const ENV_CONSUMER_SECRET: &str = "FAITHLIFE_CONSUMER_SECRET";

/// Environment variable overriding the provider root URL.
pub const ENV_ROOT_URL: &str = "FAITHLIFE_OAUTH_ROOT_URL";

/// The application's registered identity with the provider.
///
/// Created once at startup and handed to [`AuthorizationFlow`](crate::AuthorizationFlow).
#[derive(Clone, PartialEq, Eq)]
pub struct ConsumerIdentity {
    consumer_token: String,
    consumer_secret: String,
    provider_root_url: String,
}

impl std::fmt::Debug for ConsumerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerIdentity")
            .field("consumer_token", &self.consumer_token)
            .field("consumer_secret", &"<redacted>")
            .field("provider_root_url", &self.provider_root_url)
            .finish()
    }
}

impl ConsumerIdentity {
    /// Create an identity against the default provider.
    pub fn new(consumer_token: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_token: consumer_token.into(),
            consumer_secret: consumer_secret.into(),
            provider_root_url: DEFAULT_ROOT_URL.to_string(),
        }
    }

    /// Point the identity at a different provider root.
    pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
        self.provider_root_url = normalize_root_url(&root_url.into());
        self
    }

    /// Resolve from the environment only.
    pub fn from_env() -> Self {
        ConsumerConfig::default().resolve()
    }

    pub fn consumer_token(&self) -> &str {
        &self.consumer_token
    }

    pub fn consumer_secret(&self) -> &str {
        &self.consumer_secret
    }

    pub fn provider_root_url(&self) -> &str {
        &self.provider_root_url
    }

    /// Absolute URL for a provider path such as `/v1/temporarytoken`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.provider_root_url, path)
    }

    /// Check that the identity can actually talk to the provider.
    ///
    /// Header generation never calls this; hosts should at startup.
    pub fn validate(&self) -> Result<()> {
        if self.consumer_token.is_empty() {
            return Err(OAuthError::Config(format!(
                "consumer token is not set (config file, --token, or {})",
                ENV_CONSUMER_TOKEN
            )));
        }
        if self.consumer_secret.is_empty() {
            return Err(OAuthError::Config(format!(
                "consumer secret is not set (config file, --secret, or {})",
                ENV_CONSUMER_SECRET
            )));
        }
        url::Url::parse(&self.provider_root_url).map_err(|e| {
            OAuthError::Config(format!(
                "invalid provider root URL '{}': {}",
                self.provider_root_url, e
            ))
        })?;
        Ok(())
    }
}

/// File/CLI layer for the consumer identity. Every field is optional.
///
/// ```toml
/// token = "0FAD08AE080463B64E60A2347415A3BC31FAC689"
/// secret = "E119997C9F524E9E8BD22D9B6EC4FCABD254518D"
/// root_url = "https://auth.logos.com/oauth"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub root_url: Option<String>,
}

impl ConsumerConfig {
    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OAuthError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML config content.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| OAuthError::Config(format!("failed to parse config: {}", e)))
    }

    /// Overlay another layer on top of this one; set fields in `other` win.
    pub fn merge(mut self, other: ConsumerConfig) -> Self {
        if other.token.is_some() {
            self.token = other.token;
        }
        if other.secret.is_some() {
            self.secret = other.secret;
        }
        if other.root_url.is_some() {
            self.root_url = other.root_url;
        }
        self
    }

    /// Resolve against the process environment.
    pub fn resolve(self) -> ConsumerIdentity {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary variable lookup.
    pub fn resolve_with(self, lookup: impl Fn(&str) -> Option<String>) -> ConsumerIdentity {
        let pick = |explicit: Option<String>, var: &str| {
            explicit
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(var).filter(|v| !v.is_empty()))
        };

        let token = pick(self.token, ENV_CONSUMER_TOKEN).unwrap_or_default();
        let secret = pick(self.secret, ENV_CONSUMER_SECRET).unwrap_or_default();
        let root_url =
            pick(self.root_url, ENV_ROOT_URL).unwrap_or_else(|| DEFAULT_ROOT_URL.to_string());

        ConsumerIdentity::new(token, secret).with_root_url(root_url)
    }
}

fn normalize_root_url(root_url: &str) -> String {
    root_url.trim().trim_end_matches('/').to_string()
}
