//! Error types for the OAuth consumer.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, OAuthError>;

/// Errors that can occur while signing requests or running the sign-in flow.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// Missing or invalid configuration, including a missing session capability.
    #[error("Config error: {0}")]
    Config(String),

    /// The provider answered with a non-success status.
    #[error("Provider error {status}: {message}")]
    Provider { status: u16, message: String },

    /// `verify` was called without a temporary secret in the session.
    #[error("No pending authorization in session")]
    NoPendingAuthorization,

    /// Network/HTTP error reaching the provider.
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with success but an unreadable body.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Invalid inbound request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Session store failure, such as a full in-memory store.
    #[error("Session error: {0}")]
    Session(String),
}

impl OAuthError {
    /// Whether the failure came from talking to the provider.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            OAuthError::Provider { .. } | OAuthError::Network(_) | OAuthError::InvalidResponse(_)
        )
    }
}
