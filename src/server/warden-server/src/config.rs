//! Server configuration file.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use warden_auth::TokenConfig;
use warden_directory::DirectoryConfig;
use warden_federation::FederationConfig;
use warden_storage_postgres::PoolSettings;

/// Whole configuration file.
#[derive(Debug, Deserialize)]
pub struct WardenConfig {
    /// HTTP listener and assets.
    #[serde(default)]
    pub server: ServerConfig,
    /// Directory connection.
    pub directory: DirectoryConfig,
    /// Bearer tokens.
    pub token: TokenConfig,
    /// Session cookies.
    pub session: SessionConfig,
    /// SAML service provider.
    pub federation: FederationConfig,
    /// Employee and scope database.
    pub database: DatabaseConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Credential-choice page.
    pub login_page: PathBuf,
    /// Static asset directory.
    pub static_dir: PathBuf,
    /// How long in-flight requests may run after shutdown starts.
    pub shutdown_grace_secs: u64,
    /// How often expired SAML requests and revocations are purged.
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            login_page: PathBuf::from("templates/login.html"),
            static_dir: PathBuf::from("templates"),
            shutdown_grace_secs: 5,
            sweep_interval_secs: 60,
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    3600
}

/// Session cookie settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// HMAC secret for session cookies.
    pub secret: SecretString,
    /// Session lifetime.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// Mark cookies `Secure`.
    #[serde(default)]
    pub cookie_secure: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

/// Database settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres://...` or `sqlite://...`.
    pub url: SecretString,
    /// Pool upper bound.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Pool lower bound.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl DatabaseConfig {
    /// Pool sizing for PostgreSQL.
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            ..PoolSettings::default()
        }
    }
}

/// Environment overrides for values that should not live in the file.
#[derive(Debug, Default)]
pub struct SecretOverrides {
    /// Directory service account password.
    pub directory_bind_password: Option<String>,
    /// Bearer token signing secret.
    pub token_secret: Option<String>,
    /// Session cookie secret.
    pub session_secret: Option<String>,
    /// Database URL.
    pub database_url: Option<String>,
}

impl WardenConfig {
    /// Reads, overrides and validates the configuration at `path`.
    pub fn load(path: &Path, overrides: SecretOverrides) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without validating.
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse TOML")
    }

    /// Replaces secrets with the non-empty environment values.
    pub fn apply(&mut self, overrides: SecretOverrides) {
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
        if let Some(password) = non_empty(overrides.directory_bind_password) {
            self.directory.bind_password = SecretString::from(password);
        }
        if let Some(secret) = non_empty(overrides.token_secret) {
            self.token.secret = SecretString::from(secret);
        }
        if let Some(secret) = non_empty(overrides.session_secret) {
            self.session.secret = SecretString::from(secret);
        }
        if let Some(url) = non_empty(overrides.database_url) {
            self.database.url = SecretString::from(url);
        }
    }

    /// Rejects settings the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.token.secret.expose_secret().is_empty() {
            bail!("token.secret must not be empty");
        }
        if self.token.expiry_hours == 0 {
            bail!("token.expiry_hours must be positive");
        }
        if self.session.secret.expose_secret().is_empty() {
            bail!("session.secret must not be empty");
        }
        if self.session.ttl_secs == 0 {
            bail!("session.ttl_secs must be positive");
        }
        if self.directory.host.is_empty() {
            bail!("directory.host must not be empty");
        }
        if self.directory.bind_dn.is_empty() {
            bail!("directory.bind_dn must not be empty");
        }
        if self.directory.base_dn.is_empty() {
            bail!("directory.base_dn must not be empty");
        }
        if self.directory.timeout_secs == 0 {
            bail!("directory.timeout_secs must be positive");
        }
        if self.directory.health_check_interval_secs == 0 {
            bail!("directory.health_check_interval_secs must be positive");
        }
        if self.federation.request_ttl_secs == 0 {
            bail!("federation.request_ttl_secs must be positive");
        }
        if self.federation.idp_metadata_url.is_none() && self.federation.idp_metadata_path.is_none()
        {
            bail!("federation needs idp_metadata_url or idp_metadata_path");
        }
        if self.database.url.expose_secret().is_empty() {
            bail!("database.url must not be empty");
        }
        if self.database.min_connections > self.database.max_connections {
            bail!("database.min_connections exceeds max_connections");
        }
        Ok(())
    }

    /// Session lifetime.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_secs)
    }
}
