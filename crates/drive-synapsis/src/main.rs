//! Drive Synapsis auth CLI - Entry Point
//!
//! Runs the browser-based OAuth flow to provision credentials for the
//! Drive Synapsis MCP server, and manages stored credentials.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use drive_synapsis::auth::{
    AuthFlow, AuthOutcome, CredentialStore, LocalDirectoryCredentialStore, SessionStore,
};
use drive_synapsis::config::OAuthConfig;

#[derive(Parser, Debug)]
#[command(name = "drive-synapsis")]
#[command(about = "OAuth 2.1 authentication for the Drive Synapsis MCP server")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the browser-based authorization flow (default)
    Auth {
        /// Email to authenticate, for display and credential lookup
        #[arg(long)]
        email: Option<String>,
    },
    /// List users with stored credentials
    ListUsers,
    /// Delete stored credentials for a user
    Revoke {
        /// Email whose credentials should be removed
        #[arg(long)]
        email: String,
    },
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    let config = OAuthConfig::from_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        summary = %config.environment_summary(),
        "Starting Drive Synapsis auth CLI"
    );

    let sessions = Arc::new(SessionStore::new(config.oauth_states_path()));
    let credentials = Arc::new(LocalDirectoryCredentialStore::new(config.credential_files_dir()));
    let credential_store: Arc<dyn CredentialStore> = credentials.clone();
    let flow = Arc::new(AuthFlow::new(config, sessions, credential_store));

    match cli.command.unwrap_or(Command::Auth { email: None }) {
        Command::Auth { email } => run_auth(&flow, email.as_deref()).await,
        Command::ListUsers => {
            for user in credentials.list_users().await {
                println!("{user}");
            }
            Ok(())
        }
        Command::Revoke { email } => {
            flow.sessions().remove_session(&email).await;
            if credentials.delete_credential(&email).await {
                println!("Removed credentials for {email}");
                Ok(())
            } else {
                anyhow::bail!("Failed to remove credentials for {email}")
            }
        }
    }
}

/// Run the authorization flow and wait for the browser callback.
async fn run_auth(flow: &Arc<AuthFlow>, email: Option<&str>) -> anyhow::Result<()> {
    match flow.get_credentials_or_auth_url(email, None, None).await? {
        AuthOutcome::Credentials(creds) => {
            println!("Already authenticated (scopes: {}).", creds.scopes.join(", "));
            Ok(())
        }
        AuthOutcome::AuthRequired(message) => {
            println!("{message}");
            println!("\nWaiting for authorization to complete...");
            wait_for_session(flow).await
        }
    }
}

/// Poll the session store until the callback lands or the wait times out.
async fn wait_for_session(flow: &Arc<AuthFlow>) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(300);
    loop {
        if let Some(user) = flow.sessions().get_single_user_email().await {
            println!("Authentication successful! Signed in as {user}.");
            flow.shutdown_callback_listener().await;
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            flow.shutdown_callback_listener().await;
            anyhow::bail!("Timed out waiting for authorization");
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
