//! Directory connection settings.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

fn default_port() -> u16 {
    389
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_user_attribute() -> String {
    "uid".to_string()
}

fn default_mail_attribute() -> String {
    "mail".to_string()
}

/// Settings for the shared directory connection.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Directory host name.
    pub host: String,
    /// Directory port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Search base for user lookups and the liveness probe.
    pub base_dn: String,
    /// Service account distinguished name.
    pub bind_dn: String,
    /// Service account password.
    pub bind_password: SecretString,
    /// Dial `ldaps://` instead of `ldap://`.
    #[serde(default)]
    pub use_tls: bool,
    /// Skip certificate verification on TLS connections.
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    /// Upper bound for dial, bind and search round-trips.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Interval between background liveness probes.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Attribute matched against the login name.
    #[serde(default = "default_user_attribute")]
    pub user_attribute: String,
    /// Attribute holding the canonical email.
    #[serde(default = "default_mail_attribute")]
    pub mail_attribute: String,
}

impl DirectoryConfig {
    /// Creates a configuration with default port, timeouts and attribute names.
    pub fn new(
        host: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
        bind_password: SecretString,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password,
            use_tls: false,
            insecure_skip_tls_verify: false,
            timeout_secs: default_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            user_attribute: default_user_attribute(),
            mail_attribute: default_mail_attribute(),
        }
    }

    /// Connection URL for the configured transport.
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "ldaps" } else { "ldap" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Bound applied to each directory round-trip.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Interval between background health probes.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}
