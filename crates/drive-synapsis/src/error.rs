//! Error types for the Drive Synapsis auth subsystem.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.

/// Errors from the OAuth 2.1 authentication flow.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// OAuth client credentials are not configured at all.
    #[error("OAuth client not configured: {remediation}")]
    NotConfigured {
        /// Instructions for the operator on how to configure credentials.
        remediation: String,
    },

    /// The callback carried an unknown, already-consumed, or expired state.
    #[error("Invalid or expired OAuth state parameter")]
    InvalidState,

    /// The callback's state parameter is absent entirely.
    #[error("Missing OAuth state parameter")]
    MissingState,

    /// The callback's session id disagrees with the one that started the flow.
    #[error("OAuth state does not match the initiating session")]
    SessionMismatch,

    /// No PKCE code verifier was registered for the consumed state.
    #[error("Missing code verifier - PKCE flow incomplete")]
    MissingVerifier,

    /// The provider's identity endpoint returned no usable email.
    #[error("Failed to get user email from Google")]
    MissingEmail,

    /// Code-for-token exchange (or userinfo lookup) failed.
    #[error("Token exchange failed: {message}")]
    TokenExchange {
        /// Provider or transport error description.
        message: String,
        /// A fresh authorization URL the caller can present to the user.
        auth_url: Option<String>,
    },

    /// Refresh was requested but the credential has no refresh token.
    #[error("No refresh token available")]
    RefreshUnavailable,

    /// The callback listener could not be made available.
    #[error("OAuth callback listener unavailable: {0}")]
    ListenerUnavailable(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid URL in configuration or callback
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl AuthError {
    /// Create a not-configured error with remediation instructions.
    #[must_use]
    pub fn not_configured(remediation: impl Into<String>) -> Self {
        Self::NotConfigured { remediation: remediation.into() }
    }

    /// Create a token exchange error without a recovery URL.
    #[must_use]
    pub fn token_exchange(message: impl Into<String>) -> Self {
        Self::TokenExchange { message: message.into(), auth_url: None }
    }

    /// Create a token exchange error carrying a fresh authorization URL.
    #[must_use]
    pub fn token_exchange_with_url(message: impl Into<String>, auth_url: impl Into<String>) -> Self {
        Self::TokenExchange { message: message.into(), auth_url: Some(auth_url.into()) }
    }

    /// Create a listener-unavailable error.
    #[must_use]
    pub fn listener_unavailable(message: impl Into<String>) -> Self {
        Self::ListenerUnavailable(message.into())
    }

    /// The authorization URL attached to this error, if any.
    #[must_use]
    pub fn auth_url(&self) -> Option<&str> {
        match self {
            Self::TokenExchange { auth_url, .. } => auth_url.as_deref(),
            _ => None,
        }
    }

    /// Convert to a plain-language message suitable for an end user.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::InvalidState | Self::MissingState | Self::SessionMismatch => {
                "Your authorization request could not be verified. Please restart the sign-in flow."
                    .to_string()
            }
            Self::TokenExchange { message, auth_url: Some(url) } => {
                format!("{message}. Re-authorize here: {url}")
            }
            _ => self.to_string(),
        }
    }
}

/// Result type alias for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
