//! Shared handler state.

use std::{path::PathBuf, sync::Arc};

use warden_auth::{DirectoryLogin, HybridAuthenticator, SessionCodec, TokenService};
use warden_directory::HealthReport;
use warden_federation::FederationFlow;

/// HTTP-level settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Add `Secure` to every cookie.
    pub cookie_secure: bool,
    /// File served at `/login`.
    pub login_page: PathBuf,
    /// Directory served under `/static`.
    pub static_dir: PathBuf,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            cookie_secure: false,
            login_page: PathBuf::from("templates/login.html"),
            static_dir: PathBuf::from("templates"),
        }
    }
}

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppState {
    /// Directory password login pipeline.
    pub login: DirectoryLogin,
    /// Per-request credential arbitration.
    pub authenticator: HybridAuthenticator,
    /// Bearer token issuer, used for cookie lifetimes.
    pub tokens: Arc<TokenService>,
    /// Session cookie codec.
    pub sessions: Arc<SessionCodec>,
    /// SAML service provider flow.
    pub federation: Arc<FederationFlow>,
    /// Last directory health check result.
    pub directory_health: Arc<HealthReport>,
    /// HTTP settings.
    pub settings: ApiSettings,
}
