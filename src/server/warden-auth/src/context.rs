//! Authentication context types.

use serde::{Deserialize, Serialize};
use warden_federation::FederationAttributes;

use crate::token::TokenClaims;

/// Method used to authenticate the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Directory password login (bearer token).
    Directory,
    /// Federation (SAML) login.
    Federation,
}

impl AuthMethod {
    /// Value recorded in the auth-session.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Federation => "federation",
        }
    }
}

/// Authenticated caller.
///
/// Rebuilt for every request from token claims or federation session
/// attributes; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Canonical email (or the federation `NameID` if no mail was released).
    pub email: String,

    /// Granted scopes, sorted and deduplicated.
    pub scopes: Vec<String>,

    /// Authentication method used.
    pub auth_method: AuthMethod,

    /// Token expiration timestamp (Unix seconds).
    pub expires_at: Option<u64>,

    /// Attributes asserted by the identity provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<FederationAttributes>,
}

impl Principal {
    /// Principal from validated bearer token claims.
    pub fn from_token(claims: TokenClaims) -> Self {
        let mut scopes = claims.scopes;
        scopes.sort();
        scopes.dedup();
        Self {
            email: claims.sub,
            scopes,
            auth_method: AuthMethod::Directory,
            expires_at: Some(claims.exp),
            attributes: None,
        }
    }

    /// Principal from a federation session. Federation logins carry no scopes.
    pub fn from_federation(attributes: FederationAttributes) -> Self {
        let email = attributes
            .email()
            .unwrap_or(attributes.name_id.as_str())
            .to_string();
        Self {
            email,
            scopes: Vec::new(),
            auth_method: AuthMethod::Federation,
            expires_at: None,
            attributes: Some(attributes),
        }
    }

    /// Checks whether the principal holds `scope`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}
