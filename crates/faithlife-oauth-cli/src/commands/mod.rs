//! CLI command handlers.

pub mod header;
pub mod serve;
pub mod sso_url;

use std::path::Path;

use anyhow::{Context as _, Result};
use faithlife_oauth::{ConsumerConfig, ConsumerIdentity};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Resolved consumer identity (flags > config file > environment > defaults).
    pub identity: ConsumerIdentity,
}

impl Context {
    /// Resolve the consumer identity from the config file and CLI flags.
    pub fn load(
        config_path: Option<&Path>,
        token: Option<String>,
        secret: Option<String>,
        root_url: Option<String>,
    ) -> Result<Self> {
        let file = match config_path {
            Some(path) => ConsumerConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ConsumerConfig::default(),
        };

        let identity = file
            .merge(ConsumerConfig {
                token,
                secret,
                root_url,
            })
            .resolve();

        tracing::debug!(
            root_url = identity.provider_root_url(),
            has_token = !identity.consumer_token().is_empty(),
            "Resolved consumer identity"
        );

        Ok(Self { identity })
    }
}
