//! Per-request arbitration among credential sources.

use std::sync::Arc;

use tracing::{debug, warn};
use warden_crypto::fingerprint;
use warden_federation::FederationAttributes;
use warden_storage::RevocationStore;

use crate::{
    context::{AuthMethod, Principal},
    error::AuthError,
    session::SessionCodec,
    token::{TokenClaims, TokenService},
};

/// Raw credential carriers found on a request.
#[derive(Debug, Clone, Default)]
pub struct PresentedCredentials {
    /// Bearer token from the token cookie or `Authorization` header.
    pub bearer: Option<String>,
    /// Federation session cookie.
    pub federation_session: Option<String>,
}

/// The credential that survived verification, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Nothing usable was presented.
    None,
    /// A valid, non-revoked bearer token.
    Token(TokenClaims),
    /// A valid federation session.
    FederationSession(FederationAttributes),
}

/// Authentication state of a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Credentials not examined yet.
    #[default]
    Unauthenticated,
    /// Authenticated by bearer token.
    TokenAuthenticated(Principal),
    /// Authenticated by federation session.
    FederationAuthenticated(Principal),
    /// No acceptable credential; send the caller to the login page.
    Denied,
}

impl AuthState {
    /// Applies the verified credential. Only [`AuthState::Unauthenticated`]
    /// moves; settled states are returned unchanged.
    pub fn on_credential(self, credential: Credential) -> Self {
        match self {
            Self::Unauthenticated => match credential {
                Credential::Token(claims) => Self::TokenAuthenticated(Principal::from_token(claims)),
                Credential::FederationSession(attributes) if !attributes.is_empty() => {
                    Self::FederationAuthenticated(Principal::from_federation(attributes))
                },
                Credential::FederationSession(_) | Credential::None => Self::Denied,
            },
            settled => settled,
        }
    }

    /// The authenticated principal, if any.
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::TokenAuthenticated(p) | Self::FederationAuthenticated(p) => Some(p),
            Self::Unauthenticated | Self::Denied => None,
        }
    }

    /// Consumes the state, returning the principal if authenticated.
    pub fn into_principal(self) -> Option<Principal> {
        match self {
            Self::TokenAuthenticated(p) | Self::FederationAuthenticated(p) => Some(p),
            Self::Unauthenticated | Self::Denied => None,
        }
    }
}

/// Where logout sends the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutTarget {
    /// The federation logout endpoint.
    Federation,
    /// The generic login page.
    Login,
}

impl LogoutTarget {
    /// Redirect path.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Federation => "/saml/logout",
            Self::Login => "/login",
        }
    }
}

/// Decides, per request, whether the caller is authenticated.
pub struct HybridAuthenticator {
    tokens: Arc<TokenService>,
    sessions: Arc<SessionCodec>,
    revocations: Arc<dyn RevocationStore>,
}

impl HybridAuthenticator {
    /// Creates the authenticator.
    pub fn new(
        tokens: Arc<TokenService>,
        sessions: Arc<SessionCodec>,
        revocations: Arc<dyn RevocationStore>,
    ) -> Self {
        Self {
            tokens,
            sessions,
            revocations,
        }
    }

    /// Verifies the presented carriers, bearer token first.
    ///
    /// A rejected or revoked token falls through to the federation session.
    pub async fn identify(&self, presented: &PresentedCredentials) -> Credential {
        if let Some(token) = presented.bearer.as_deref().filter(|t| !t.is_empty()) {
            match self.tokens.validate(token) {
                Ok(claims) if !self.is_revoked(token).await => return Credential::Token(claims),
                Ok(claims) => debug!(email = %claims.sub, "Ignoring revoked bearer token"),
                Err(e) => debug!(error = %e, "Ignoring invalid bearer token"),
            }
        }

        if let Some(session) = presented
            .federation_session
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            match self.sessions.decode_federation(session) {
                Ok(attributes) => return Credential::FederationSession(attributes),
                Err(e) => debug!(error = %e, "Ignoring invalid federation session"),
            }
        }

        Credential::None
    }

    /// Runs the full decision for one request.
    pub async fn authenticate(&self, presented: &PresentedCredentials) -> AuthState {
        let credential = self.identify(presented).await;
        AuthState::Unauthenticated.on_credential(credential)
    }

    /// Deny-lists a valid token until its natural expiry. Returns `false` if
    /// the token was not valid to begin with.
    pub async fn revoke(&self, token: &str) -> Result<bool, AuthError> {
        let Ok(claims) = self.tokens.validate(token) else {
            return Ok(false);
        };
        let expires_at = i64::try_from(claims.exp).unwrap_or(i64::MAX);
        self.revocations
            .revoke(&fingerprint(token), expires_at)
            .await?;
        debug!(email = %claims.sub, "Bearer token revoked");
        Ok(true)
    }

    /// Logout destination recorded by the auth-session cookie.
    pub fn logout_target(&self, auth_session: Option<&str>) -> LogoutTarget {
        match auth_session.map(|s| self.sessions.decode_auth_session(s)) {
            Some(Ok(AuthMethod::Federation)) => LogoutTarget::Federation,
            _ => LogoutTarget::Login,
        }
    }

    async fn is_revoked(&self, token: &str) -> bool {
        match self.revocations.is_revoked(&fingerprint(token)).await {
            Ok(revoked) => revoked,
            Err(e) => {
                warn!(error = %e, "Revocation lookup failed, refusing bearer token");
                true
            },
        }
    }
}
