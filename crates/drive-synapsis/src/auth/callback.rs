//! OAuth callback listener.
//!
//! A minimal HTTP listener that receives the redirect from Google when no
//! other server is already listening (stdio transport). Runs on a spawned
//! task so the main request path never blocks on a browser round-trip.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use super::flow::AuthFlow;
use super::pages;
use super::scopes;
use super::session_store;
use crate::error::{AuthError, AuthResult};

/// How long to wait for the spawned listener to become connectable.
const START_TIMEOUT: Duration = Duration::from_secs(3);

struct ListenerState {
    running: bool,
    bound_port: Option<u16>,
    handle: Option<JoinHandle<()>>,
}

/// Shared state for the callback route.
struct CallbackState {
    /// Weak to avoid an `AuthFlow -> CallbackServer -> AuthFlow` cycle.
    flow: Weak<AuthFlow>,
    redirect_uri: String,
}

/// Minimal HTTP server for OAuth callbacks.
pub struct CallbackServer {
    host: String,
    port: u16,
    flow: Weak<AuthFlow>,
    state: Mutex<ListenerState>,
}

impl CallbackServer {
    /// Create a listener for `base_uri:port`, dispatching callbacks to the
    /// given flow coordinator.
    #[must_use]
    pub fn new(base_uri: &str, port: u16, flow: Weak<AuthFlow>) -> Self {
        let host = url::Url::parse(base_uri)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            host,
            port,
            flow,
            state: Mutex::new(ListenerState { running: false, bound_port: None, handle: None }),
        }
    }

    /// Start the listener.
    ///
    /// Idempotent: starting a running listener is a no-op success. A port
    /// occupied by another process fails fast at bind time. After the serve
    /// task is spawned, waits (bounded) for the port to become connectable
    /// before declaring success.
    pub async fn start(&self) -> AuthResult<()> {
        let mut state = self.state.lock().await;
        if state.running {
            tracing::info!("OAuth callback listener is already running");
            return Ok(());
        }

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to bind OAuth callback listener");
            AuthError::listener_unavailable(format!("Port {} is already in use: {e}", self.port))
        })?;
        let bound_port = listener.local_addr().map(|a| a.port()).unwrap_or(self.port);

        let redirect_uri = self
            .flow
            .upgrade()
            .map_or_else(|| format!("http://{addr}/oauth2callback"), |f| f.config().redirect_uri());
        let router = build_router(Weak::clone(&self.flow), redirect_uri);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "OAuth callback listener error");
            }
        });

        let probe_addr = format!("{}:{}", self.host, bound_port);
        let deadline = tokio::time::Instant::now() + START_TIMEOUT;
        loop {
            if tokio::net::TcpStream::connect(&probe_addr).await.is_ok() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                handle.abort();
                return Err(AuthError::listener_unavailable(format!(
                    "Failed to start OAuth callback listener on {probe_addr}"
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        state.running = true;
        state.bound_port = Some(bound_port);
        state.handle = Some(handle);
        tracing::info!(addr = %probe_addr, "OAuth callback listener started");
        Ok(())
    }

    /// Stop the listener if running.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.handle.take() {
            handle.abort();
        }
        if state.running {
            state.running = false;
            tracing::info!("OAuth callback listener stopped");
        }
    }

    /// Whether the listener is currently running.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// The port the listener actually bound, once running.
    pub async fn bound_port(&self) -> Option<u16> {
        self.state.lock().await.bound_port
    }
}

impl std::fmt::Debug for CallbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackServer")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

fn build_router(flow: Weak<AuthFlow>, redirect_uri: String) -> Router {
    let state = Arc::new(CallbackState { flow, redirect_uri });
    Router::new()
        .route("/oauth2callback", get(handle_oauth_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /oauth2callback?code=...&state=...&error=...`
async fn handle_oauth_callback(
    State(state): State<Arc<CallbackState>>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let raw_query = raw_query.unwrap_or_default();
    let params: HashMap<String, String> = url::form_urlencoded::parse(raw_query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if let Some(error) = params.get("error") {
        let message = format!("Google returned an error: {error}");
        tracing::error!(%message, "OAuth callback rejected");
        return (StatusCode::BAD_REQUEST, Html(pages::render_error_page(&message)))
            .into_response();
    }

    if !params.contains_key("code") {
        let message = "No authorization code received from Google";
        tracing::error!(%message, "OAuth callback rejected");
        return (StatusCode::BAD_REQUEST, Html(pages::render_error_page(message))).into_response();
    }

    let Some(flow) = state.flow.upgrade() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(pages::render_error_page("Server is shutting down")),
        )
            .into_response();
    };

    tracing::info!(
        state = ?params.get("state").map(|s| session_store::truncate(s)),
        "OAuth callback received code"
    );

    let full_url = if raw_query.is_empty() {
        state.redirect_uri.clone()
    } else {
        format!("{}?{}", state.redirect_uri, raw_query)
    };

    match flow
        .handle_auth_callback(&scopes::scopes(), &full_url, &state.redirect_uri, None)
        .await
    {
        Ok((user_email, _)) => {
            tracing::info!(user = %user_email, "OAuth callback authenticated");
            Html(pages::render_success_page(&user_email)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Error processing OAuth callback");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(pages::render_error_page(&e.to_user_message())),
            )
                .into_response()
        }
    }
}
