//! Drive Synapsis authentication subsystem
//!
//! OAuth 2.1 authentication and session persistence for the Drive Synapsis
//! MCP server: PKCE-enforced authorization flows against Google, durable
//! per-user credential storage, restart-surviving CSRF state, and token
//! refresh.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use drive_synapsis::auth::{AuthFlow, LocalDirectoryCredentialStore, SessionStore};
//! use drive_synapsis::config::OAuthConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OAuthConfig::from_env();
//!     let sessions = Arc::new(SessionStore::new(config.oauth_states_path()));
//!     let credentials = Arc::new(LocalDirectoryCredentialStore::new(config.credential_files_dir()));
//!     let flow = Arc::new(AuthFlow::new(config, sessions, credentials));
//!
//!     if let Some(creds) = flow.get_credentials(None, None, None).await {
//!         // Use creds.token for Google API calls
//!         drop(creds);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;

pub use auth::{AuthFlow, AuthOutcome, CredentialStore, SessionStore, UserCredentials};
pub use config::OAuthConfig;
pub use error::{AuthError, AuthResult};
