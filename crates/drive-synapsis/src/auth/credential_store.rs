//! Durable per-user credential storage.
//!
//! One JSON file per user, named by a reversible URL-safe base64 encoding of
//! the email so that any valid address (plus-addressing, underscores,
//! unicode) maps to a filesystem-safe name without collisions.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use super::credentials::UserCredentials;

/// Capability set for credential storage backends.
///
/// The production backend is a local directory; alternate backends (e.g. a
/// remote secret manager) can implement this without changing callers.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Get credentials for a user by email. Absent or unreadable files are
    /// `None`, never an error.
    async fn get_credential(&self, user_email: &str) -> Option<UserCredentials>;

    /// Store credentials for a user. Returns false on I/O failure.
    async fn store_credential(&self, user_email: &str, credentials: &UserCredentials) -> bool;

    /// Delete credentials for a user. A missing file is success.
    async fn delete_credential(&self, user_email: &str) -> bool;

    /// List all users with stored credentials, sorted.
    async fn list_users(&self) -> Vec<String>;
}

/// Encode an email into a filesystem-safe, reversible filename stem.
#[must_use]
pub fn email_to_filename(user_email: &str) -> String {
    URL_SAFE_NO_PAD.encode(user_email.as_bytes())
}

/// Decode a filename stem back to the original email.
///
/// Restores the base64 padding stripped by [`email_to_filename`].
#[must_use]
pub fn filename_to_email(filename: &str) -> Option<String> {
    let mut padded = filename.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let bytes = base64::engine::general_purpose::URL_SAFE.decode(padded).ok()?;
    String::from_utf8(bytes).ok()
}

/// Credential store backed by local JSON files.
#[derive(Debug)]
pub struct LocalDirectoryCredentialStore {
    base_dir: PathBuf,
}

impl LocalDirectoryCredentialStore {
    /// Create a store rooted at `base_dir`.
    ///
    /// The directory is created lazily on first write, so constructing a
    /// store never fails.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        tracing::info!(dir = %base_dir.display(), "Local credential store initialized");
        Self { base_dir }
    }

    /// The directory holding the credential files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn credential_path(&self, user_email: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", email_to_filename(user_email)))
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        if !self.base_dir.exists() {
            std::fs::create_dir_all(&self.base_dir)?;
            tracing::info!(dir = %self.base_dir.display(), "Created credentials directory");
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for LocalDirectoryCredentialStore {
    async fn get_credential(&self, user_email: &str) -> Option<UserCredentials> {
        let path = self.credential_path(user_email);
        if !path.exists() {
            tracing::debug!(user = %user_email, "No credential file found");
            return None;
        }

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(user = %user_email, error = %e, "Failed to read credential file");
                return None;
            }
        };

        match serde_json::from_str::<UserCredentials>(&raw) {
            Ok(credentials) => {
                tracing::debug!(user = %user_email, "Loaded credentials");
                Some(credentials)
            }
            Err(e) => {
                tracing::warn!(user = %user_email, error = %e, "Failed to parse credential file");
                None
            }
        }
    }

    async fn store_credential(&self, user_email: &str, credentials: &UserCredentials) -> bool {
        if let Err(e) = self.ensure_dir() {
            tracing::error!(error = %e, "Failed to create credentials directory");
            return false;
        }

        let path = self.credential_path(user_email);
        let serialized = match serde_json::to_string_pretty(credentials) {
            Ok(serialized) => serialized,
            Err(e) => {
                tracing::error!(user = %user_email, error = %e, "Failed to serialize credentials");
                return false;
            }
        };

        match std::fs::write(&path, serialized) {
            Ok(()) => {
                tracing::info!(user = %user_email, "Stored credentials");
                true
            }
            Err(e) => {
                tracing::error!(user = %user_email, error = %e, "Failed to store credentials");
                false
            }
        }
    }

    async fn delete_credential(&self, user_email: &str) -> bool {
        let path = self.credential_path(user_email);
        if !path.exists() {
            return true;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(user = %user_email, "Deleted credentials");
                true
            }
            Err(e) => {
                tracing::error!(user = %user_email, error = %e, "Failed to delete credentials");
                false
            }
        }
    }

    async fn list_users(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut users = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else { continue };
            match filename_to_email(stem) {
                Some(email) => users.push(email),
                None => {
                    tracing::warn!(file = %name, "Could not decode credential filename, skipping");
                }
            }
        }

        users.sort();
        users
    }
}
