//! Directory password login.

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, warn};

use crate::{
    backend::PasswordVerifier,
    context::{AuthMethod, Principal},
    error::AuthError,
    resolver::AuthorizationResolver,
    token::{now_secs, TokenService},
};

/// A successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Signed bearer token.
    pub token: String,
    /// The principal the token describes.
    pub principal: Principal,
}

/// Verifies a password, resolves scopes and mints a bearer token.
///
/// Any failing stage aborts the login; no token is issued for a partially
/// resolved identity.
pub struct DirectoryLogin {
    verifier: Arc<dyn PasswordVerifier>,
    resolver: AuthorizationResolver,
    tokens: Arc<TokenService>,
}

impl DirectoryLogin {
    /// Creates the login pipeline.
    pub fn new(
        verifier: Arc<dyn PasswordVerifier>,
        resolver: AuthorizationResolver,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            verifier,
            resolver,
            tokens,
        }
    }

    /// Runs verification, scope resolution and token issuance.
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginOutcome, AuthError> {
        let email = self
            .verifier
            .verify_password(username, password)
            .await
            .inspect_err(|e| {
                warn!(
                    username = %username,
                    backend = self.verifier.name(),
                    stage = "verify",
                    error = %e,
                    "Login failed"
                );
            })?;

        let scopes = self.resolver.resolve_scopes(&email).await.inspect_err(|e| {
            warn!(username = %username, stage = "authorize", error = %e, "Login failed");
        })?;

        let token = self.tokens.issue(&email, &scopes)?;
        info!(username = %username, email = %email, "Directory login succeeded");

        Ok(LoginOutcome {
            token,
            principal: Principal {
                email,
                scopes,
                auth_method: AuthMethod::Directory,
                expires_at: Some(now_secs() + self.tokens.expiry().as_secs()),
                attributes: None,
            },
        })
    }
}
