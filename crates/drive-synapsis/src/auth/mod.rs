//! OAuth 2.1 authentication for Drive Synapsis.
//!
//! Covers the full browser-based authorization flow against Google:
//! CSRF-state issuance with PKCE, the callback listener, code-for-token
//! exchange, identity resolution, durable credential storage, and token
//! refresh. Both single-user and multi-user deployments are supported.

pub mod callback;
pub mod credential_store;
pub mod credentials;
pub mod flow;
pub mod pages;
pub mod pkce;
pub mod scopes;
pub mod session_store;

pub use credential_store::{CredentialStore, LocalDirectoryCredentialStore};
pub use credentials::UserCredentials;
pub use flow::{AuthFlow, AuthOutcome};
pub use session_store::SessionStore;
