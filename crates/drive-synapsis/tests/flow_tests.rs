//! Integration tests for the OAuth flow coordinator.
//!
//! Google's token and userinfo endpoints are stood in for by wiremock, so
//! these exercise the real exchange/refresh paths end to end.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use drive_synapsis::auth::credential_store::{CredentialStore, LocalDirectoryCredentialStore};
use drive_synapsis::auth::credentials::UserCredentials;
use drive_synapsis::auth::session_store::SessionStore;
use drive_synapsis::auth::{AuthFlow, AuthOutcome, scopes};
use drive_synapsis::config::OAuthConfig;
use drive_synapsis::error::AuthError;

const REDIRECT_URI: &str = "http://127.0.0.1:9877/oauth2callback";

fn build_flow(credentials_dir: &Path, provider_url: &str) -> Arc<AuthFlow> {
    let config = OAuthConfig::for_testing(credentials_dir, provider_url);
    let sessions = Arc::new(SessionStore::new(config.oauth_states_path()));
    let store: Arc<dyn CredentialStore> =
        Arc::new(LocalDirectoryCredentialStore::new(config.credential_files_dir()));
    Arc::new(AuthFlow::new(config, sessions, store))
}

fn session_credentials(token: &str, expired: bool, token_uri: &str) -> UserCredentials {
    let offset = if expired { -Duration::minutes(10) } else { Duration::hours(1) };
    UserCredentials {
        token: token.to_string(),
        refresh_token: Some("refresh-1".to_string()),
        token_uri: token_uri.to_string(),
        client_id: Some("test-client-id".to_string()),
        client_secret: Some("test-client-secret".to_string()),
        scopes: scopes::scopes(),
        expiry: Some((Utc::now() + offset).naive_utc()),
    }
}

async fn mount_token_endpoint(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "refresh_token": "refresh-new",
            "expires_in": 3600,
            "token_type": "Bearer",
            "scope": scopes::scopes().join(" "),
        })))
        .mount(server)
        .await;
}

async fn mount_userinfo_endpoint(server: &MockServer, email: &str) {
    Mock::given(method("GET"))
        .and(path("/oauth2/v2/userinfo"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "email": email, "verified_email": true })),
        )
        .mount(server)
        .await;
}

// ─── start_auth_flow ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_auth_flow_builds_url_and_registers_state() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());

    let message =
        flow.start_auth_flow(Some("user@example.com"), "Drive Synapsis", REDIRECT_URI).await.unwrap();

    assert!(message.contains("ACTION REQUIRED"));
    assert!(message.contains("user@example.com"));
    assert!(message.contains("access_type=offline"));
    assert!(message.contains("prompt=consent"));
    assert!(message.contains("code_challenge_method=S256"));

    // The CSRF state is pending in the session store.
    assert_eq!(flow.sessions().stats().await.pending_oauth_states, 1);
}

#[tokio::test]
async fn test_start_auth_flow_without_client_credentials_fails() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let mut config = OAuthConfig::for_testing(dir.path(), &server.uri());
    config.client_id = None;
    config.client_secret = None;

    let sessions = Arc::new(SessionStore::new(config.oauth_states_path()));
    let store: Arc<dyn CredentialStore> =
        Arc::new(LocalDirectoryCredentialStore::new(config.credential_files_dir()));
    let flow = AuthFlow::new(config, sessions, store);

    let err = flow.start_auth_flow(None, "Drive Synapsis", REDIRECT_URI).await.unwrap_err();
    assert!(matches!(err, AuthError::NotConfigured { .. }));
    assert!(err.to_string().contains("GOOGLE_OAUTH_CLIENT_ID"));
}

#[tokio::test]
async fn test_client_secrets_file_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let mut config = OAuthConfig::for_testing(dir.path(), &server.uri());
    config.client_id = None;
    config.client_secret = None;

    std::fs::create_dir_all(dir.path()).unwrap();
    std::fs::write(
        config.client_secrets_path(),
        json!({"installed": {"client_id": "file-client", "client_secret": "file-secret"}})
            .to_string(),
    )
    .unwrap();

    let sessions = Arc::new(SessionStore::new(config.oauth_states_path()));
    let store: Arc<dyn CredentialStore> =
        Arc::new(LocalDirectoryCredentialStore::new(config.credential_files_dir()));
    let flow = AuthFlow::new(config, sessions, store);

    let message = flow.start_auth_flow(None, "Drive Synapsis", REDIRECT_URI).await.unwrap();
    assert!(message.contains("client_id=file-client"));
}

// ─── handle_auth_callback ────────────────────────────────────────────────────

#[tokio::test]
async fn test_callback_exchanges_code_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "access-fresh").await;
    mount_userinfo_endpoint(&server, "user@example.com").await;

    let flow = build_flow(dir.path(), &server.uri());
    flow.sessions().store_oauth_state("state-1", None, Some("verifier-1")).await.unwrap();

    let callback_url = format!("{REDIRECT_URI}?code=code-1&state=state-1");
    let (email, credentials) = flow
        .handle_auth_callback(&scopes::scopes(), &callback_url, REDIRECT_URI, None)
        .await
        .unwrap();

    assert_eq!(email, "user@example.com");
    assert_eq!(credentials.token, "access-fresh");
    assert_eq!(credentials.refresh_token.as_deref(), Some("refresh-new"));
    assert!(!credentials.is_expired());

    // Written through to both stores.
    let session_creds = flow.sessions().get_credentials("user@example.com").await.unwrap();
    assert_eq!(session_creds.token, "access-fresh");
    assert!(flow.get_credentials(Some("user@example.com"), None, None).await.is_some());
}

#[tokio::test]
async fn test_callback_sends_pkce_verifier() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code_verifier=verifier-xyz"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_userinfo_endpoint(&server, "user@example.com").await;

    let flow = build_flow(dir.path(), &server.uri());
    flow.sessions().store_oauth_state("state-1", None, Some("verifier-xyz")).await.unwrap();

    let callback_url = format!("{REDIRECT_URI}?code=code-1&state=state-1");
    flow.handle_auth_callback(&scopes::scopes(), &callback_url, REDIRECT_URI, None).await.unwrap();
}

#[tokio::test]
async fn test_callback_without_state_param_fails() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());

    let callback_url = format!("{REDIRECT_URI}?code=code-1");
    let err = flow
        .handle_auth_callback(&scopes::scopes(), &callback_url, REDIRECT_URI, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MissingState));
}

#[tokio::test]
async fn test_callback_with_unknown_state_fails() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());

    let callback_url = format!("{REDIRECT_URI}?code=code-1&state=never-issued");
    let err = flow
        .handle_auth_callback(&scopes::scopes(), &callback_url, REDIRECT_URI, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidState));
}

#[tokio::test]
async fn test_callback_without_verifier_fails() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());

    // A state can lose its verifier across a restart; PKCE is still mandatory.
    flow.sessions().store_oauth_state("state-1", None, None).await.unwrap();

    let callback_url = format!("{REDIRECT_URI}?code=code-1&state=state-1");
    let err = flow
        .handle_auth_callback(&scopes::scopes(), &callback_url, REDIRECT_URI, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MissingVerifier));
}

#[tokio::test]
async fn test_callback_session_mismatch_fails() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());

    flow.sessions().store_oauth_state("state-1", Some("s1"), Some("v")).await.unwrap();

    let callback_url = format!("{REDIRECT_URI}?code=code-1&state=state-1");
    let err = flow
        .handle_auth_callback(&scopes::scopes(), &callback_url, REDIRECT_URI, Some("s2"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SessionMismatch));
}

#[tokio::test]
async fn test_callback_provider_rejection_is_domain_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    let flow = build_flow(dir.path(), &server.uri());
    flow.sessions().store_oauth_state("state-1", None, Some("v")).await.unwrap();

    let callback_url = format!("{REDIRECT_URI}?code=bad-code&state=state-1");
    let err = flow
        .handle_auth_callback(&scopes::scopes(), &callback_url, REDIRECT_URI, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenExchange { .. }));
    assert!(err.to_string().contains("invalid_grant"));

    // No partial credential was written.
    assert!(flow.get_credentials(None, None, None).await.is_none());
}

#[tokio::test]
async fn test_callback_without_email_fails() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "access-1").await;
    Mock::given(method("GET"))
        .and(path("/oauth2/v2/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "123"})))
        .mount(&server)
        .await;

    let flow = build_flow(dir.path(), &server.uri());
    flow.sessions().store_oauth_state("state-1", None, Some("v")).await.unwrap();

    let callback_url = format!("{REDIRECT_URI}?code=code-1&state=state-1");
    let err = flow
        .handle_auth_callback(&scopes::scopes(), &callback_url, REDIRECT_URI, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MissingEmail));
}

// ─── get_credentials ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_credentials_by_session_id() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());

    let creds = session_credentials("tok", false, &format!("{}/token", server.uri()));
    flow.sessions().store_session("a@b.com", creds, Some("sess-1")).await;

    let found = flow.get_credentials(None, None, Some("sess-1")).await.unwrap();
    assert_eq!(found.token, "tok");
}

#[tokio::test]
async fn test_scope_subset_treated_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());

    let mut creds = session_credentials("tok", false, &format!("{}/token", server.uri()));
    creds.scopes = vec!["drive".to_string()];
    flow.sessions().store_session("a@b.com", creds, None).await;

    let required = vec!["drive".to_string(), "docs".to_string()];
    assert!(flow.get_credentials(Some("a@b.com"), Some(&required), None).await.is_none());

    let satisfied = vec!["drive".to_string()];
    assert!(flow.get_credentials(Some("a@b.com"), Some(&satisfied), None).await.is_some());
}

#[tokio::test]
async fn test_single_user_file_fallback_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());

    // Durable credential file exists, but the in-memory session store is
    // empty, as after a restart.
    let file_store = LocalDirectoryCredentialStore::new(
        flow.config().credential_files_dir(),
    );
    let creds = session_credentials("tok-disk", false, &format!("{}/token", server.uri()));
    assert!(file_store.store_credential("only@example.com", &creds).await);

    let found = flow.get_credentials(None, None, None).await.unwrap();
    assert_eq!(found.token, "tok-disk");
}

#[tokio::test]
async fn test_expired_credentials_refresh_and_write_back() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-refreshed",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let flow = build_flow(dir.path(), &server.uri());
    let creds = session_credentials("tok-stale", true, &format!("{}/token", server.uri()));
    flow.sessions().store_session("a@b.com", creds, None).await;

    let found = flow.get_credentials(Some("a@b.com"), None, None).await.unwrap();
    assert_eq!(found.token, "tok-refreshed");
    // The original refresh token is kept when the provider omits a new one.
    assert_eq!(found.refresh_token.as_deref(), Some("refresh-1"));

    // Refreshed credential written back to both stores.
    let session_creds = flow.sessions().get_credentials("a@b.com").await.unwrap();
    assert_eq!(session_creds.token, "tok-refreshed");
    let file_store = LocalDirectoryCredentialStore::new(flow.config().credential_files_dir());
    let file_creds = file_store.get_credential("a@b.com").await.unwrap();
    assert_eq!(file_creds.token, "tok-refreshed");
}

#[tokio::test]
async fn test_refresh_failure_degrades_to_none() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    let flow = build_flow(dir.path(), &server.uri());
    let creds = session_credentials("tok-stale", true, &format!("{}/token", server.uri()));
    flow.sessions().store_session("a@b.com", creds, None).await;

    assert!(flow.get_credentials(Some("a@b.com"), None, None).await.is_none());
}

#[tokio::test]
async fn test_expired_without_refresh_token_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());

    let mut creds = session_credentials("tok-stale", true, &format!("{}/token", server.uri()));
    creds.refresh_token = None;
    flow.sessions().store_session("a@b.com", creds, None).await;

    assert!(flow.get_credentials(Some("a@b.com"), None, None).await.is_none());
}

// ─── get_credentials_or_auth_url + callback listener ─────────────────────────

#[tokio::test]
async fn test_auth_url_issued_when_no_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());

    match flow.get_credentials_or_auth_url(None, None, None).await.unwrap() {
        AuthOutcome::AuthRequired(message) => {
            assert!(message.contains("code_challenge"));
        }
        AuthOutcome::Credentials(_) => panic!("expected auth message"),
    }

    // Listener came up as part of issuing the URL; starting again is a no-op.
    assert!(flow.callback_listener_port().await.is_some());
    flow.ensure_callback_listener().await.unwrap();
    flow.shutdown_callback_listener().await;
}

#[tokio::test]
async fn test_callback_endpoint_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "access-http").await;
    mount_userinfo_endpoint(&server, "web@example.com").await;

    let flow = build_flow(dir.path(), &server.uri());
    flow.ensure_callback_listener().await.unwrap();
    let port = flow.callback_listener_port().await.unwrap();

    flow.sessions().store_oauth_state("state-http", None, Some("verifier-http")).await.unwrap();

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{port}/oauth2callback?code=code-1&state=state-http"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body = response.text().await.unwrap();
    assert!(body.contains("web@example.com"));

    assert!(flow.sessions().has_session("web@example.com").await);
    flow.shutdown_callback_listener().await;
}

#[tokio::test]
async fn test_callback_endpoint_multibyte_state_gets_error_page() {
    // An info-level subscriber makes the handler's state log field render,
    // so a multi-byte state exercises the truncation path end to end.
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();

    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());
    flow.ensure_callback_listener().await.unwrap();
    let port = flow.callback_listener_port().await.unwrap();

    let client = reqwest::Client::new();
    let response = client
        .get(format!(
            "http://127.0.0.1:{port}/oauth2callback?code=x&state=%E2%82%AC%E2%82%AC%E2%82%AC"
        ))
        .send()
        .await
        .unwrap();

    // The state is unknown, so the user gets the error page, not a
    // dropped connection.
    assert_eq!(response.status().as_u16(), 500);
    assert!(response.text().await.unwrap().contains("could not be verified"));

    flow.shutdown_callback_listener().await;
}

#[tokio::test]
async fn test_callback_endpoint_provider_error_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let flow = build_flow(dir.path(), &server.uri());
    flow.ensure_callback_listener().await.unwrap();
    let port = flow.callback_listener_port().await.unwrap();

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{port}/oauth2callback?error=access_denied"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    assert!(response.text().await.unwrap().contains("access_denied"));

    let response = client
        .get(format!("http://127.0.0.1:{port}/oauth2callback"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    flow.shutdown_callback_listener().await;
}
