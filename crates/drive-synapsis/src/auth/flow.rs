//! OAuth 2.1 flow coordination.
//!
//! Builds authorization URLs, validates and consumes CSRF states, exchanges
//! authorization codes for tokens, resolves user identity, refreshes
//! expired credentials, and keeps the session store and credential store in
//! sync. Network calls to Google never run while a store lock is held; the
//! stores serialize only their own in-memory/disk transitions.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use super::callback::CallbackServer;
use super::credential_store::CredentialStore;
use super::credentials::UserCredentials;
use super::pkce;
use super::scopes;
use super::session_store::{self, SessionStore};
use crate::config::OAuthConfig;
use crate::error::{AuthError, AuthResult};

/// OAuth client credentials resolved from the environment or secrets file.
#[derive(Debug, Clone)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
}

/// Shape of the `client_secret.json` fallback file. Google issues both
/// "web" and "installed" application variants.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    web: Option<ClientSecretsEntry>,
    installed: Option<ClientSecretsEntry>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsEntry {
    client_id: String,
    client_secret: String,
}

/// Token endpoint response for both code exchange and refresh grants.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

/// Userinfo endpoint response. Only the email matters here.
#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
}

/// Outcome of [`AuthFlow::get_credentials_or_auth_url`].
#[derive(Debug)]
pub enum AuthOutcome {
    /// Valid credentials, ready for API calls.
    Credentials(Box<UserCredentials>),
    /// No usable credential; an actionable authorization message.
    AuthRequired(String),
}

/// Coordinates the OAuth 2.1 flow across the stores and Google endpoints.
pub struct AuthFlow {
    config: OAuthConfig,
    sessions: Arc<SessionStore>,
    credentials: Arc<dyn CredentialStore>,
    http: reqwest::Client,
    listener: Mutex<Option<Arc<CallbackServer>>>,
}

impl AuthFlow {
    /// Create a flow coordinator over the given stores.
    #[must_use]
    pub fn new(
        config: OAuthConfig,
        sessions: Arc<SessionStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            sessions,
            credentials,
            http: reqwest::Client::new(),
            listener: Mutex::new(None),
        }
    }

    /// The configuration this coordinator was built with.
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// The shared session store.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Check whether OAuth client secrets are available.
    ///
    /// Returns remediation instructions when they are not.
    #[must_use]
    pub fn check_client_secrets(&self) -> Option<String> {
        if self.config.client_id.is_some() && self.config.client_secret.is_some() {
            return None;
        }
        if self.config.client_secrets_path().exists() {
            return None;
        }
        Some(format!(
            "OAuth client credentials not found. Please either:\n\
             1. Set GOOGLE_OAUTH_CLIENT_ID and GOOGLE_OAUTH_CLIENT_SECRET environment variables\n\
             2. Place client_secret.json in {}",
            self.config.client_secrets_path().display()
        ))
    }

    /// Resolve client secrets from the environment or the secrets file.
    fn load_client_secrets(&self) -> AuthResult<ClientSecrets> {
        if let (Some(client_id), Some(client_secret)) =
            (self.config.client_id.clone(), self.config.client_secret.clone())
        {
            tracing::debug!("Loaded OAuth client credentials from environment");
            return Ok(ClientSecrets { client_id, client_secret });
        }

        let path = self.config.client_secrets_path();
        let raw = std::fs::read_to_string(&path).map_err(|_| {
            AuthError::not_configured(
                self.check_client_secrets()
                    .unwrap_or_else(|| "client secrets unreadable".to_string()),
            )
        })?;
        let parsed: ClientSecretsFile = serde_json::from_str(&raw)?;
        let entry = parsed.web.or(parsed.installed).ok_or_else(|| {
            AuthError::not_configured(format!(
                "Invalid client secrets file format at {}: expected a \"web\" or \"installed\" key",
                path.display()
            ))
        })?;
        tracing::debug!(path = %path.display(), "Loaded OAuth client credentials from file");
        Ok(ClientSecrets { client_id: entry.client_id, client_secret: entry.client_secret })
    }

    /// Initiate the authorization flow and return an actionable message.
    ///
    /// Generates a fresh CSRF state and PKCE pair, registers them in the
    /// session store, and embeds the authorization URL in a message the
    /// caller can show to the user.
    pub async fn start_auth_flow(
        &self,
        user_email: Option<&str>,
        service_name: &str,
        redirect_uri: &str,
    ) -> AuthResult<String> {
        if let Some(remediation) = self.check_client_secrets() {
            return Err(AuthError::not_configured(remediation));
        }
        let secrets = self.load_client_secrets()?;

        let user_display = user_email
            .map_or_else(|| service_name.to_string(), |e| format!("{service_name} for '{e}'"));
        tracing::info!(target = %user_display, "Initiating auth flow");

        // 16 random bytes, hex-encoded, for CSRF protection.
        let oauth_state = uuid::Uuid::new_v4().simple().to_string();
        let pkce = pkce::generate_pair();

        let auth_url = self.build_authorization_url(
            &secrets,
            &scopes::scopes(),
            redirect_uri,
            &oauth_state,
            &pkce.challenge,
        )?;

        self.sessions
            .store_oauth_state(&oauth_state, None, Some(&pkce.verifier))
            .await?;

        tracing::info!(state = %session_store::truncate(&oauth_state), "Auth flow started");

        Ok(format!(
            "**ACTION REQUIRED: Google Authentication Needed for {user_display}**\n\n\
             To proceed, authorize this application for {service_name} access.\n\n\
             **Click this link to authenticate:**\n\
             [Authorize {service_name} Access]({auth_url})\n\n\
             **Full URL (LLM: always print this for the user):**\n\
             ```\n{auth_url}\n```\n\n\
             **Instructions:**\n\
             1. Click the link above and complete authorization in your browser\n\
             2. After successful authorization, the browser will show a success message\n\
             3. Return here and retry your original command"
        ))
    }

    /// Build the Google authorization URL with offline access, forced
    /// consent (so a refresh token is issued even on re-consent), and the
    /// PKCE S256 challenge.
    fn build_authorization_url(
        &self,
        secrets: &ClientSecrets,
        scopes: &[String],
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> AuthResult<String> {
        let mut url = Url::parse(&self.config.auth_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &secrets.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url.into())
    }

    /// Handle the OAuth callback redirect from Google.
    ///
    /// Validates and consumes the state, exchanges the code for tokens
    /// using the registered PKCE verifier, resolves the user's email, and
    /// persists the credential into both stores.
    pub async fn handle_auth_callback(
        &self,
        scopes: &[String],
        authorization_response: &str,
        redirect_uri: &str,
        session_id: Option<&str>,
    ) -> AuthResult<(String, UserCredentials)> {
        let callback_url = Url::parse(authorization_response)?;
        let query: Vec<(String, String)> =
            callback_url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        let param = |name: &str| query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

        let state = param("state").ok_or(AuthError::MissingState)?;

        let state_info =
            self.sessions.validate_and_consume_oauth_state(state, session_id).await?;
        tracing::debug!(state = %session_store::truncate(state), "Validated OAuth state");

        // Never bypassed: exchanging without the verifier would reopen
        // authorization-code interception.
        let code_verifier = state_info.code_verifier.ok_or(AuthError::MissingVerifier)?;

        let code = param("code")
            .ok_or_else(|| AuthError::token_exchange("No authorization code in callback"))?;

        let secrets = self.load_client_secrets()?;
        let token = self.exchange_code(&secrets, code, &code_verifier, redirect_uri).await?;
        tracing::info!("Successfully exchanged authorization code for tokens");

        let granted_scopes = token
            .scope
            .as_deref()
            .map_or_else(|| scopes.to_vec(), |s| s.split(' ').map(str::to_string).collect());
        let credentials = UserCredentials {
            token: token.access_token,
            refresh_token: token.refresh_token,
            token_uri: self.config.token_url.clone(),
            client_id: Some(secrets.client_id),
            client_secret: Some(secrets.client_secret),
            scopes: granted_scopes,
            expiry: token
                .expires_in
                .map(|secs| (Utc::now() + Duration::seconds(secs)).naive_utc()),
        };

        let user_email = self.fetch_user_email(&credentials.token).await?;
        tracing::info!(user = %user_email, "Authenticated user");

        self.credentials.store_credential(&user_email, &credentials).await;
        self.sessions.store_session(&user_email, credentials.clone(), session_id).await;

        Ok((user_email, credentials))
    }

    /// Exchange an authorization code for tokens at the token endpoint.
    async fn exchange_code(
        &self,
        secrets: &ClientSecrets,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> AuthResult<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &secrets.client_id),
            ("client_secret", &secrets.client_secret),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::token_exchange(format!("Token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::token_exchange(format!("Failed to read token response: {e}")))?;

        if !status.is_success() {
            return Err(AuthError::token_exchange(format!(
                "Token exchange rejected (HTTP {status}): {body}"
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| AuthError::token_exchange(format!("Invalid token response: {e}")))
    }

    /// Refresh an access token using the stored refresh token.
    async fn refresh_token(&self, credentials: &UserCredentials) -> AuthResult<TokenResponse> {
        let refresh_token =
            credentials.refresh_token.as_deref().ok_or(AuthError::RefreshUnavailable)?;
        let client_id = credentials.client_id.clone().unwrap_or_default();
        let client_secret = credentials.client_secret.clone().unwrap_or_default();

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &client_id),
            ("client_secret", &client_secret),
        ];

        let response = self
            .http
            .post(&credentials.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::token_exchange(format!("Refresh request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::token_exchange(format!("Failed to read refresh response: {e}")))?;

        if !status.is_success() {
            return Err(AuthError::token_exchange(format!(
                "Token refresh rejected (HTTP {status}): {body}"
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| AuthError::token_exchange(format!("Invalid refresh response: {e}")))
    }

    /// Fetch the authenticated user's email from the userinfo endpoint.
    async fn fetch_user_email(&self, access_token: &str) -> AuthResult<String> {
        let response = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::token_exchange(format!("Userinfo request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::MissingEmail);
        }

        let info: UserInfo = response.json().await.map_err(|_| AuthError::MissingEmail)?;
        info.email.filter(|e| !e.is_empty()).ok_or(AuthError::MissingEmail)
    }

    /// Get stored credentials, refreshing if necessary.
    ///
    /// Resolution order: session id, explicit email (session store then
    /// credential store), single-user session fallback, single-user
    /// credential-file fallback. A credential missing any required scope is
    /// treated as absent. Refresh failure degrades to `None` so the caller
    /// can re-trigger the authorization flow.
    pub async fn get_credentials(
        &self,
        user_email: Option<&str>,
        required_scopes: Option<&[String]>,
        session_id: Option<&str>,
    ) -> Option<UserCredentials> {
        let default_scopes = scopes::scopes();
        let required = required_scopes.unwrap_or(&default_scopes);

        let (resolved_email, credentials) = self.resolve_credentials(user_email, session_id).await?;

        if !credentials.scopes.is_empty() && !credentials.has_scopes(required) {
            tracing::warn!(user = %resolved_email, "Credentials lack required scopes");
            return None;
        }

        if credentials.is_valid() {
            return Some(credentials);
        }

        if credentials.is_expired() && credentials.refresh_token.is_some() {
            tracing::info!(user = %resolved_email, "Credentials expired, attempting refresh");
            return self.refresh_and_store(&resolved_email, credentials, session_id).await;
        }

        tracing::warn!(user = %resolved_email, "Credentials invalid and cannot be refreshed");
        None
    }

    /// Walk the resolution order and return the first credential found,
    /// together with the email it belongs to.
    async fn resolve_credentials(
        &self,
        user_email: Option<&str>,
        session_id: Option<&str>,
    ) -> Option<(String, UserCredentials)> {
        if let Some(session_id) = session_id {
            if let Some(email) = self.sessions.get_user_by_session(session_id).await {
                if let Some(credentials) = self.sessions.get_credentials(&email).await {
                    tracing::debug!(session = %session_id, "Found credentials for session");
                    return Some((email, credentials));
                }
            }
        }

        if let Some(email) = user_email {
            if let Some(credentials) = self.sessions.get_credentials(email).await {
                return Some((email.to_string(), credentials));
            }
            if let Some(credentials) = self.credentials.get_credential(email).await {
                return Some((email.to_string(), credentials));
            }
        }

        if let Some(email) = self.sessions.get_single_user_email().await {
            if let Some(credentials) = self.sessions.get_credentials(&email).await {
                return Some((email, credentials));
            }
            if let Some(credentials) = self.credentials.get_credential(&email).await {
                return Some((email, credentials));
            }
        }

        // Covers a restart that emptied the in-memory sessions while a
        // durable credential file for exactly one user remains.
        let stored_users = self.credentials.list_users().await;
        if let [email] = stored_users.as_slice() {
            if let Some(credentials) = self.credentials.get_credential(email).await {
                tracing::info!(user = %email, "Loaded credentials for single stored user");
                return Some((email.clone(), credentials));
            }
        }

        tracing::info!("No credentials found");
        None
    }

    /// Refresh an expired credential and write the result back to both
    /// stores. Any failure degrades to `None`.
    async fn refresh_and_store(
        &self,
        user_email: &str,
        mut credentials: UserCredentials,
        session_id: Option<&str>,
    ) -> Option<UserCredentials> {
        match self.refresh_token(&credentials).await {
            Ok(token) => {
                credentials.token = token.access_token;
                if token.refresh_token.is_some() {
                    credentials.refresh_token = token.refresh_token;
                }
                credentials.expiry = token
                    .expires_in
                    .map(|secs| (Utc::now() + Duration::seconds(secs)).naive_utc());
                tracing::info!(user = %user_email, "Credentials refreshed successfully");

                self.credentials.store_credential(user_email, &credentials).await;
                self.sessions.store_session(user_email, credentials.clone(), session_id).await;
                Some(credentials)
            }
            Err(e) => {
                tracing::warn!(user = %user_email, error = %e, "Token refresh failed");
                None
            }
        }
    }

    /// Get valid credentials, or an authorization message if a new flow is
    /// needed. Ensures the callback listener is reachable before issuing
    /// the URL.
    pub async fn get_credentials_or_auth_url(
        self: &Arc<Self>,
        user_email: Option<&str>,
        required_scopes: Option<&[String]>,
        session_id: Option<&str>,
    ) -> AuthResult<AuthOutcome> {
        if let Some(credentials) = self.get_credentials(user_email, required_scopes, session_id).await
        {
            return Ok(AuthOutcome::Credentials(Box::new(credentials)));
        }

        self.ensure_callback_listener().await?;

        let message = self
            .start_auth_flow(user_email, "Drive Synapsis", &self.config.redirect_uri())
            .await?;
        Ok(AuthOutcome::AuthRequired(message))
    }

    /// Make sure the callback listener is running, starting it on first
    /// use. Idempotent; a bind conflict fails fast.
    pub async fn ensure_callback_listener(self: &Arc<Self>) -> AuthResult<()> {
        let mut listener = self.listener.lock().await;
        if listener.is_none() {
            *listener = Some(Arc::new(CallbackServer::new(
                &self.config.base_uri,
                self.config.port,
                Arc::downgrade(self),
            )));
        }
        let server = listener.as_ref().map(Arc::clone);
        drop(listener);

        match server {
            Some(server) => server.start().await,
            None => Err(AuthError::listener_unavailable("listener not constructed")),
        }
    }

    /// Port the callback listener actually bound, once running.
    pub async fn callback_listener_port(&self) -> Option<u16> {
        match self.listener.lock().await.as_ref() {
            Some(server) => server.bound_port().await,
            None => None,
        }
    }

    /// Stop the callback listener if it was started.
    pub async fn shutdown_callback_listener(&self) {
        if let Some(server) = self.listener.lock().await.take() {
            server.stop().await;
        }
    }
}

impl std::fmt::Debug for AuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFlow").field("config", &self.config).finish()
    }
}
