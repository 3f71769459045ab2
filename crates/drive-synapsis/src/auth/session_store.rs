//! OAuth 2.1 session store.
//!
//! Holds three maps behind one lock: active sessions keyed by email, a
//! session-id to email index, and pending authorization states (CSRF state
//! plus PKCE verifier). Pending states are written through to disk after
//! every mutation so an authorization flow survives a server restart
//! between "user redirected to Google" and "user redirected back".

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::credentials::UserCredentials;
use crate::config::OAUTH_STATE_TTL_SECS;
use crate::error::{AuthError, AuthResult};

/// A pending authorization request awaiting its callback.
#[derive(Debug, Clone)]
pub struct PendingState {
    /// Session id that initiated the flow, if any.
    pub session_id: Option<String>,
    /// PKCE code verifier generated for this request. Memory-only: the
    /// persisted state file never contains it.
    pub code_verifier: Option<String>,
    /// When the state was issued.
    pub created_at: DateTime<Utc>,
    /// When the state stops being valid.
    pub expires_at: DateTime<Utc>,
}

/// On-disk shape of one persisted state entry.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    session_id: Option<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

/// An active user session.
#[derive(Debug, Clone)]
struct SessionEntry {
    credentials: UserCredentials,
    session_id: Option<String>,
}

/// Store statistics for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_sessions: usize,
    pub users: Vec<String>,
    pub session_mappings: usize,
    pub pending_oauth_states: usize,
}

#[derive(Default)]
struct SessionStoreInner {
    /// email -> session entry. Exactly one entry per email.
    sessions: HashMap<String, SessionEntry>,
    /// session id -> email.
    session_index: HashMap<String, String>,
    /// state token -> pending authorization request.
    pending_states: HashMap<String, PendingState>,
}

/// Remove expired pending states. Caller must hold the lock.
fn sweep_expired(inner: &mut SessionStoreInner) {
    let now = Utc::now();
    inner.pending_states.retain(|state, data| {
        let live = data.expires_at > now;
        if !live {
            tracing::debug!(state = %truncate(state), "Removed expired OAuth state");
        }
        live
    });
}

/// First eight characters of a state value, for log fields. States arrive
/// from the network, so truncation must respect char boundaries.
pub(crate) fn truncate(state: &str) -> &str {
    match state.char_indices().nth(8) {
        Some((idx, _)) => &state[..idx],
        None => state,
    }
}

/// Process-wide session store, constructed once and shared by `Arc`.
pub struct SessionStore {
    inner: Mutex<SessionStoreInner>,
    states_path: PathBuf,
}

impl SessionStore {
    /// Create a store persisting pending states at `states_path`.
    ///
    /// Loads any previously persisted states, tolerating a missing or
    /// malformed file, and sweeps entries that expired while the process
    /// was down.
    #[must_use]
    pub fn new(states_path: impl Into<PathBuf>) -> Self {
        let states_path = states_path.into();
        let mut inner = SessionStoreInner::default();
        load_states_from_disk(&states_path, &mut inner);
        sweep_expired(&mut inner);
        tracing::info!(
            count = inner.pending_states.len(),
            file = %states_path.display(),
            "Session store initialized"
        );
        Self { inner: Mutex::new(inner), states_path }
    }

    /// Register a pending authorization state with the default 600 s TTL.
    pub async fn store_oauth_state(
        &self,
        state: &str,
        session_id: Option<&str>,
        code_verifier: Option<&str>,
    ) -> AuthResult<()> {
        self.store_oauth_state_with_ttl(state, session_id, code_verifier, OAUTH_STATE_TTL_SECS)
            .await
    }

    /// Register a pending authorization state with an explicit TTL.
    ///
    /// Re-issuing the same state value overwrites the previous entry.
    pub async fn store_oauth_state_with_ttl(
        &self,
        state: &str,
        session_id: Option<&str>,
        code_verifier: Option<&str>,
        ttl_seconds: i64,
    ) -> AuthResult<()> {
        if state.is_empty() {
            return Err(AuthError::MissingState);
        }

        let mut inner = self.inner.lock().await;
        sweep_expired(&mut inner);

        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds.max(0));
        inner.pending_states.insert(
            state.to_string(),
            PendingState {
                session_id: session_id.map(str::to_string),
                code_verifier: code_verifier.map(str::to_string),
                created_at: now,
                expires_at,
            },
        );

        persist_states(&self.states_path, &inner);
        tracing::debug!(state = %truncate(state), expires_at = %expires_at, "Stored OAuth state");
        Ok(())
    }

    /// Validate a state value and consume it.
    ///
    /// Atomically sweeps expired states, rejects unknown or expired values,
    /// rejects (and destroys) states bound to a different session id, and
    /// removes the entry on success so every state is single-use. Two
    /// concurrent callbacks for the same state yield exactly one success.
    pub async fn validate_and_consume_oauth_state(
        &self,
        state: &str,
        session_id: Option<&str>,
    ) -> AuthResult<PendingState> {
        if state.is_empty() {
            return Err(AuthError::MissingState);
        }

        let mut inner = self.inner.lock().await;
        sweep_expired(&mut inner);

        // Removal doubles as consumption; a mismatch below leaves the
        // state destroyed so a retry with the wrong session cannot succeed.
        let Some(info) = inner.pending_states.remove(state) else {
            tracing::error!("OAuth callback received unknown or expired state");
            return Err(AuthError::InvalidState);
        };
        persist_states(&self.states_path, &inner);

        if let (Some(bound), Some(supplied)) = (info.session_id.as_deref(), session_id) {
            if bound != supplied {
                tracing::error!(
                    expected = %bound,
                    got = %supplied,
                    "OAuth state session mismatch"
                );
                return Err(AuthError::SessionMismatch);
            }
        }

        tracing::debug!(state = %truncate(state), "Validated and consumed OAuth state");
        Ok(info)
    }

    /// Upsert the session for a user.
    ///
    /// If a session id is supplied, the session-id index is pointed at this
    /// email. Older session ids that previously resolved to the same email
    /// are left in place, so multiple session ids may resolve to one user.
    pub async fn store_session(
        &self,
        user_email: &str,
        credentials: UserCredentials,
        session_id: Option<&str>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(
            user_email.to_string(),
            SessionEntry { credentials, session_id: session_id.map(str::to_string) },
        );

        if let Some(session_id) = session_id {
            inner.session_index.insert(session_id.to_string(), user_email.to_string());
            tracing::info!(user = %user_email, session = %session_id, "Stored OAuth session");
        } else {
            tracing::info!(user = %user_email, "Stored OAuth session");
        }
    }

    /// Credentials for a user, reconstructed from the stored session fields.
    pub async fn get_credentials(&self, user_email: &str) -> Option<UserCredentials> {
        let inner = self.inner.lock().await;
        let entry = inner.sessions.get(user_email);
        if entry.is_none() {
            tracing::debug!(user = %user_email, "No OAuth session found");
        }
        entry.map(|entry| entry.credentials.clone())
    }

    /// Credentials resolved through the session-id index.
    pub async fn get_credentials_by_session(&self, session_id: &str) -> Option<UserCredentials> {
        let inner = self.inner.lock().await;
        let Some(user_email) = inner.session_index.get(session_id) else {
            tracing::debug!(session = %session_id, "No user mapping found for session");
            return None;
        };
        inner.sessions.get(user_email).map(|entry| entry.credentials.clone())
    }

    /// Email a session id resolves to, if any.
    pub async fn get_user_by_session(&self, session_id: &str) -> Option<String> {
        self.inner.lock().await.session_index.get(session_id).cloned()
    }

    /// Remove a user's session and its recorded session-id mapping.
    pub async fn remove_session(&self, user_email: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.sessions.remove(user_email) {
            if let Some(session_id) = entry.session_id {
                inner.session_index.remove(&session_id);
            }
            tracing::info!(user = %user_email, "Removed OAuth session");
        }
    }

    /// Whether a user has an active session.
    pub async fn has_session(&self, user_email: &str) -> bool {
        self.inner.lock().await.sessions.contains_key(user_email)
    }

    /// The sole authenticated email when exactly one session exists.
    pub async fn get_single_user_email(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        if inner.sessions.len() == 1 {
            inner.sessions.keys().next().cloned()
        } else {
            None
        }
    }

    /// Store statistics for diagnostics.
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().await;
        StoreStats {
            total_sessions: inner.sessions.len(),
            users: inner.sessions.keys().cloned().collect(),
            session_mappings: inner.session_index.len(),
            pending_oauth_states: inner.pending_states.len(),
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("states_path", &self.states_path).finish()
    }
}

/// Load persisted states into `inner`, tolerating a missing or bad file.
fn load_states_from_disk(path: &Path, inner: &mut SessionStoreInner) {
    if !path.exists() {
        tracing::debug!("No persisted OAuth states file found");
        return;
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read OAuth states file");
            return;
        }
    };

    let persisted: HashMap<String, PersistedState> = match serde_json::from_str(&raw) {
        Ok(persisted) => persisted,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse OAuth states file, ignoring");
            return;
        }
    };

    let loaded = persisted.len();
    for (state, data) in persisted {
        inner.pending_states.insert(
            state,
            PendingState {
                session_id: data.session_id,
                code_verifier: None,
                created_at: data.created_at,
                expires_at: data.expires_at,
            },
        );
    }
    tracing::info!(count = loaded, "Loaded OAuth states from disk");
}

/// Persist the pending-states map atomically. Caller must hold the lock.
///
/// Write failure is logged but does not roll back the in-memory state; the
/// in-memory map remains the operative truth for this process lifetime.
fn persist_states(path: &Path, inner: &SessionStoreInner) {
    let serializable: HashMap<&String, PersistedState> = inner
        .pending_states
        .iter()
        .map(|(state, data)| {
            (
                state,
                PersistedState {
                    session_id: data.session_id.clone(),
                    expires_at: data.expires_at,
                    created_at: data.created_at,
                },
            )
        })
        .collect();

    let serialized = match serde_json::to_string_pretty(&serializable) {
        Ok(serialized) => serialized,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize OAuth states");
            return;
        }
    };

    // Write to a temp file in the same directory, then rename, so a crash
    // never leaves a half-written state table.
    let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    if let Err(e) = std::fs::write(&temp_path, serialized) {
        tracing::error!(error = %e, "Failed to write OAuth states temp file");
        return;
    }
    if let Err(e) = std::fs::rename(&temp_path, path) {
        tracing::error!(error = %e, "Failed to replace OAuth states file");
        let _ = std::fs::remove_file(&temp_path);
        return;
    }

    tracing::debug!(count = inner.pending_states.len(), "Persisted OAuth states to disk");
}
