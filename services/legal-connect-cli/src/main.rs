//! Legal Connect command-line client
//!
//! Signs in to the Legal Connect API, keeps the session in a local credential
//! file between runs and sends authenticated requests through `AuthClient`.
//!
//! ```text
//! legal-connect [--config PATH] [--metrics] login [EMAIL]
//! legal-connect [--config PATH] [--metrics] logout
//! legal-connect [--config PATH] [--metrics] status
//! legal-connect [--config PATH] [--metrics] request METHOD PATH [JSON_BODY]
//! ```

mod config;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use api_client::{ApiResponse, AuthClient, Method, OutboundRequest, SessionState};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use session_auth::FileCredentialStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "legal-connect", version, about = "Legal Connect API client")]
struct Cli {
    /// Config file (falls back to CONFIG_PATH, then legal-connect.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    /// Sign in and store the session locally
    Login {
        /// Account email (defaults to credentials.email)
        email: Option<String>,
    },
    /// End the session on the server and locally
    Logout,
    /// Show the session state, verifying it with the server
    Status,
    /// Send an authenticated request and print the response body
    Request {
        /// HTTP method, case-insensitive
        #[arg(value_parser = parse_method)]
        method: Method,
        /// Path below the API base URL, e.g. /matters/
        path: String,
        /// JSON request body
        #[arg(value_parser = parse_json)]
        body: Option<serde_json::Value>,
    },
}

fn parse_method(raw: &str) -> std::result::Result<Method, String> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|e| format!("invalid HTTP method {raw:?}: {e}"))
}

fn parse_json(raw: &str) -> std::result::Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("request body must be valid JSON: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let prometheus = if cli.metrics {
        Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("failed to install metrics recorder")?,
        )
    } else {
        None
    };

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        path = %config_path.display(),
        base_url = %config.api.base_url,
        credentials = %config.credentials.path.display(),
        "configuration loaded"
    );

    let store = Arc::new(FileCredentialStore::open(config.credentials.path.clone()).await);
    let client = AuthClient::new(config.client_config(), store)
        .await
        .context("failed to create API client")?;
    client.register_auth_state_subscriber(|authenticated| {
        if !authenticated {
            warn!("session ended, run `legal-connect login` to sign in again");
        }
    });

    let outcome = run(&client, &config, cli.command).await;

    if let Some(handle) = prometheus {
        eprint!("{}", handle.render());
    }
    outcome
}

async fn run(client: &AuthClient, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Login { email } => {
            let email = email
                .or_else(|| config.credentials.email.clone())
                .context("no email given and credentials.email is not set")?;
            let password = config.password()?;
            client
                .login(&email, password)
                .await
                .with_context(|| format!("login as {email} failed"))?;
            println!("logged in as {email}");
        }
        Command::Logout => {
            client.logout().await.context("logout failed")?;
            println!("logged out");
        }
        Command::Status => {
            let verified = match client.session_state() {
                SessionState::Unauthenticated => false,
                _ => client
                    .verify_session()
                    .await
                    .context("could not reach the API to verify the session")?,
            };
            let status = serde_json::json!({
                "base_url": client.base_url(),
                "session": client.session_state().label(),
                "verified": verified,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Request { method, path, body } => {
            let mut request = OutboundRequest::new(method, path);
            if let Some(body) = body {
                request = request.json(&body)?;
            }
            let response = client.send(&request).await?;
            println!("{}", render_body(&response));
            if !response.is_success() {
                bail!("API returned {}", response.status());
            }
        }
    }
    Ok(())
}

/// Pretty-print JSON bodies; anything else is shown as text.
fn render_body(response: &ApiResponse) -> String {
    match response.json::<serde_json::Value>() {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| response.text()),
        Err(_) => response.text(),
    }
}
