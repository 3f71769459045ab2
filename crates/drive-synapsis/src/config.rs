//! OAuth configuration for the Drive Synapsis server.
//!
//! Centralizes every OAuth-related setting so no endpoint or path is
//! hardcoded at the call sites. Values come from `DRIVE_SYNAPSIS_*`
//! environment variables with local-development defaults.

use std::path::{Path, PathBuf};

/// Google OAuth endpoint constants.
pub mod endpoints {
    /// Authorization endpoint (browser redirect target).
    pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";

    /// Token endpoint (code exchange and refresh).
    pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

    /// Userinfo endpoint (identity lookup for an access token).
    pub const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
}

/// Default TTL for pending authorization states, in seconds.
pub const OAUTH_STATE_TTL_SECS: i64 = 600;

/// PKCE is an OAuth 2.1 requirement, not an option.
pub const PKCE_REQUIRED: bool = true;

/// Code challenge methods this deployment accepts.
pub const SUPPORTED_CODE_CHALLENGE_METHODS: &[&str] = &["S256"];

/// Server configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Base URI the callback listener binds under (scheme + host, no port).
    pub base_uri: String,

    /// Port for the callback listener.
    pub port: u16,

    /// External URL override for reverse-proxy deployments.
    pub external_url: Option<String>,

    /// Explicit redirect URI override.
    pub redirect_uri_override: Option<String>,

    /// Additional redirect URIs registered with the OAuth client.
    pub custom_redirect_uris: Vec<String>,

    /// Directory holding credential files, the client secret file, and
    /// the persisted OAuth state table.
    pub credentials_dir: PathBuf,

    /// OAuth client id from the environment, if set.
    pub client_id: Option<String>,

    /// OAuth client secret from the environment, if set.
    pub client_secret: Option<String>,

    /// Token endpoint URL (overridable for tests).
    pub token_url: String,

    /// Authorization endpoint URL (overridable for tests).
    pub auth_url: String,

    /// Userinfo endpoint URL (overridable for tests).
    pub userinfo_url: String,
}

impl OAuthConfig {
    /// Load configuration from `DRIVE_SYNAPSIS_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let base_uri = std::env::var("DRIVE_SYNAPSIS_BASE_URI")
            .unwrap_or_else(|_| "http://localhost".to_string());
        let port = std::env::var("DRIVE_SYNAPSIS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(9877);
        let external_url = std::env::var("DRIVE_SYNAPSIS_EXTERNAL_URL").ok();
        let redirect_uri_override = std::env::var("DRIVE_SYNAPSIS_REDIRECT_URI").ok();
        let custom_redirect_uris = std::env::var("DRIVE_SYNAPSIS_CUSTOM_REDIRECT_URIS")
            .map(|v| v.split(',').map(|u| u.trim().to_string()).filter(|u| !u.is_empty()).collect())
            .unwrap_or_default();
        let credentials_dir = std::env::var("DRIVE_SYNAPSIS_CREDENTIALS_DIR")
            .map_or_else(|_| default_credentials_dir(), PathBuf::from);

        Self {
            base_uri,
            port,
            external_url,
            redirect_uri_override,
            custom_redirect_uris,
            credentials_dir,
            client_id: std::env::var("GOOGLE_OAUTH_CLIENT_ID").ok(),
            client_secret: std::env::var("GOOGLE_OAUTH_CLIENT_SECRET").ok(),
            token_url: endpoints::TOKEN_URL.to_string(),
            auth_url: endpoints::AUTH_URL.to_string(),
            userinfo_url: endpoints::USERINFO_URL.to_string(),
        }
    }

    /// Create a test configuration rooted at a scratch directory, with all
    /// provider endpoints pointed at a mock server.
    #[must_use]
    pub fn for_testing(credentials_dir: &Path, provider_base_url: &str) -> Self {
        Self {
            base_uri: "http://127.0.0.1".to_string(),
            port: 0,
            external_url: None,
            redirect_uri_override: None,
            custom_redirect_uris: Vec::new(),
            credentials_dir: credentials_dir.to_path_buf(),
            client_id: Some("test-client-id".to_string()),
            client_secret: Some("test-client-secret".to_string()),
            token_url: format!("{provider_base_url}/token"),
            auth_url: format!("{provider_base_url}/auth"),
            userinfo_url: format!("{provider_base_url}/oauth2/v2/userinfo"),
        }
    }

    /// Base URL with port, e.g. `http://localhost:9877`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.base_uri, self.port)
    }

    /// Base URL for constructing OAuth endpoints.
    ///
    /// Uses the external URL if set (reverse-proxy deployments), otherwise
    /// the constructed base URL with port.
    #[must_use]
    pub fn oauth_base_url(&self) -> String {
        self.external_url.clone().unwrap_or_else(|| self.base_url())
    }

    /// The primary OAuth redirect URI.
    ///
    /// An explicit override wins; otherwise derived from the OAuth base URL.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        self.redirect_uri_override
            .clone()
            .unwrap_or_else(|| format!("{}/oauth2callback", self.oauth_base_url()))
    }

    /// All valid redirect URIs, primary first, deduplicated in order.
    #[must_use]
    pub fn redirect_uris(&self) -> Vec<String> {
        let mut uris = vec![self.redirect_uri()];
        for uri in &self.custom_redirect_uris {
            if !uris.contains(uri) {
                uris.push(uri.clone());
            }
        }
        uris
    }

    /// Path to the fallback client secrets file.
    #[must_use]
    pub fn client_secrets_path(&self) -> PathBuf {
        self.credentials_dir.join("client_secret.json")
    }

    /// Path to the persisted OAuth state table.
    #[must_use]
    pub fn oauth_states_path(&self) -> PathBuf {
        self.credentials_dir.join("oauth_states.json")
    }

    /// Directory holding per-user credential files.
    #[must_use]
    pub fn credential_files_dir(&self) -> PathBuf {
        self.credentials_dir.join("credentials")
    }

    /// Check whether OAuth client credentials are available at all.
    ///
    /// Either the environment pair or the client secrets file must exist.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        if self.client_id.is_some() && self.client_secret.is_some() {
            return true;
        }
        self.client_secrets_path().exists()
    }

    /// A summary of the effective configuration, excluding secrets.
    #[must_use]
    pub fn environment_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "base_url": self.base_url(),
            "external_url": self.external_url,
            "effective_oauth_url": self.oauth_base_url(),
            "redirect_uri": self.redirect_uri(),
            "credentials_dir": self.credentials_dir.display().to_string(),
            "client_configured": self.is_configured(),
            "pkce_required": PKCE_REQUIRED,
            "code_challenge_methods": SUPPORTED_CODE_CHALLENGE_METHODS,
        })
    }
}

fn default_credentials_dir() -> PathBuf {
    dirs::home_dir().map_or_else(
        || PathBuf::from(".drive-synapsis"),
        |home| home.join(".drive-synapsis"),
    )
}
