//! Warden CLI - Command line interface.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{redirect::Policy, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden CLI - Log in and inspect the authentication gateway")]
#[command(version)]
struct Cli {
    /// Warden server address
    #[arg(long, default_value = "http://localhost:8080", env = "WARDEN_ADDR")]
    addr: String,

    /// Bearer token
    #[arg(long, env = "WARDEN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server status
    Status,
    /// Log in with a directory account and print the bearer token
    Login {
        /// Directory username
        #[arg(long)]
        username: String,
    },
    /// Show who the token belongs to
    Whoami,
    /// Revoke the token
    Logout,
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    directory: DirectoryHealth,
}

#[derive(Debug, Deserialize)]
struct DirectoryHealth {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// HTTP Client
// ============================================================================

struct WardenClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl WardenClient {
    fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        // Redirects carry meaning (login page, logout target); never follow them.
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .context("Bearer token required. Set WARDEN_TOKEN or use --token")
    }

    async fn get_health(&self) -> Result<HealthResponse> {
        let resp = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .context("Failed to connect to server")?;

        // A degraded gateway answers 503 with the same body.
        if !resp.status().is_success() && resp.status() != StatusCode::SERVICE_UNAVAILABLE {
            bail!("Server error: {}", resp.status());
        }

        resp.json().await.context("Failed to parse response")
    }

    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let req = LoginRequest { username, password };

        let resp = self
            .client
            .post(self.url("/ldap-login"))
            .json(&req)
            .send()
            .await
            .context("Failed to connect to server")?;

        if !resp.status().is_success() {
            let error: ErrorResponse = resp.json().await.unwrap_or(ErrorResponse {
                error: "Unknown error".into(),
            });
            bail!("Login failed: {}", error.error);
        }

        resp.json().await.context("Failed to parse response")
    }

    async fn whoami(&self) -> Result<Option<String>> {
        let resp = self
            .client
            .get(self.url("/"))
            .bearer_auth(self.token()?)
            .send()
            .await
            .context("Failed to connect to server")?;

        match resp.status() {
            StatusCode::OK => Ok(Some(resp.text().await.context("Failed to read response")?)),
            StatusCode::FOUND => Ok(None),
            status => bail!("Server error: {}", status),
        }
    }

    async fn logout(&self) -> Result<()> {
        let resp = self
            .client
            .get(self.url("/logout"))
            .bearer_auth(self.token()?)
            .send()
            .await
            .context("Failed to connect to server")?;

        if resp.status() != StatusCode::FOUND {
            bail!("Logout failed: {}", resp.status());
        }

        Ok(())
    }
}

// ============================================================================
// Command Handlers
// ============================================================================

async fn cmd_status(client: &WardenClient) -> Result<()> {
    let health = client.get_health().await?;

    println!("Warden server status:");
    println!("  Status:    {}", health.status);
    println!("  Version:   {}", health.version);
    println!("  Directory: {}", health.directory.status);
    if let Some(error) = health.directory.error {
        println!("  Error:     {}", error);
    }

    Ok(())
}

async fn cmd_login(client: &WardenClient, username: &str) -> Result<()> {
    print!("Password for {}: ", username);
    io::stdout().flush()?;
    let mut password = String::new();
    io::stdin().lock().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']);

    if password.is_empty() {
        bail!("Password cannot be empty");
    }

    let result = client.login(username, password).await?;

    println!("{}", result.token);
    eprintln!();
    eprintln!("Export it for later commands: export WARDEN_TOKEN=<token>");

    Ok(())
}

async fn cmd_whoami(client: &WardenClient) -> Result<()> {
    match client.whoami().await? {
        Some(body) => print!("{}", body),
        None => bail!("Token rejected: not authenticated"),
    }
    Ok(())
}

async fn cmd_logout(client: &WardenClient) -> Result<()> {
    client.logout().await?;
    // Logout succeeds even when revocation fails, so check the token itself.
    match client.whoami().await? {
        None => println!("Logged out, token revoked"),
        Some(_) => {
            println!("Logged out");
            eprintln!("Warning: the server still accepts this token");
        },
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let client = WardenClient::new(&cli.addr, cli.token)?;
    tracing::debug!(addr = %client.base_url, "Using Warden server");

    match cli.command {
        Commands::Status => cmd_status(&client).await,
        Commands::Login { username } => cmd_login(&client, &username).await,
        Commands::Whoami => cmd_whoami(&client).await,
        Commands::Logout => cmd_logout(&client).await,
    }
}
