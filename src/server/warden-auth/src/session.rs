//! Signed session cookies.
//!
//! HMAC-signed JWTs, keyed with the session secret:
//! - the federation session, carrying the IdP's attributes
//! - the auth-session, recording which method logged the browser in
//! - the logout ticket, handing the ended federation session to single logout
//!
//! Each carries a `kind` claim so one cannot be replayed as the other.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use warden_federation::FederationAttributes;

use crate::{
    context::AuthMethod,
    error::{AuthError, TokenError},
    token::{now_secs, JwtCodec},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SessionKind {
    Federation,
    AuthSession,
    LogoutTicket,
}

/// Lifetime of a logout ticket; it only spans one redirect.
pub const LOGOUT_TICKET_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize, Deserialize)]
struct FederationSessionClaims {
    sub: String,
    kind: SessionKind,
    attrs: FederationAttributes,
    exp: u64,
    iat: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthSessionClaims {
    sub: String,
    kind: SessionKind,
    auth_method: AuthMethod,
    exp: u64,
    iat: u64,
}

/// Encodes and decodes session cookies.
pub struct SessionCodec {
    codec: JwtCodec,
    ttl: Duration,
}

impl SessionCodec {
    /// Creates a codec. Rejects an empty secret or zero ttl.
    pub fn new(secret: &SecretString, ttl: Duration) -> Result<Self, AuthError> {
        if ttl.is_zero() {
            return Err(AuthError::Configuration("session ttl must be positive".into()));
        }
        Ok(Self {
            codec: JwtCodec::new(secret)?,
            ttl,
        })
    }

    /// Session lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Encodes a federation session.
    pub fn encode_federation(
        &self,
        attributes: &FederationAttributes,
    ) -> Result<String, AuthError> {
        self.encode_attributes(SessionKind::Federation, attributes, self.ttl)
    }

    /// Decodes a federation session.
    pub fn decode_federation(&self, token: &str) -> Result<FederationAttributes, TokenError> {
        self.decode_attributes(SessionKind::Federation, token)
    }

    /// Encodes a logout ticket for a federation session being ended.
    ///
    /// The ticket is not a credential; only single logout reads it.
    pub fn encode_logout_ticket(
        &self,
        attributes: &FederationAttributes,
    ) -> Result<String, AuthError> {
        self.encode_attributes(SessionKind::LogoutTicket, attributes, LOGOUT_TICKET_TTL)
    }

    /// Decodes a logout ticket.
    pub fn decode_logout_ticket(&self, token: &str) -> Result<FederationAttributes, TokenError> {
        self.decode_attributes(SessionKind::LogoutTicket, token)
    }

    fn encode_attributes(
        &self,
        kind: SessionKind,
        attributes: &FederationAttributes,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = now_secs();
        self.codec.encode(&FederationSessionClaims {
            sub: attributes.name_id.clone(),
            kind,
            attrs: attributes.clone(),
            exp: now + ttl.as_secs(),
            iat: now,
        })
    }

    fn decode_attributes(
        &self,
        kind: SessionKind,
        token: &str,
    ) -> Result<FederationAttributes, TokenError> {
        let claims: FederationSessionClaims = self.codec.decode(token)?;
        if claims.kind != kind || claims.sub != claims.attrs.name_id {
            return Err(TokenError::Malformed);
        }
        Ok(claims.attrs)
    }

    /// Encodes an auth-session recording `method`.
    pub fn encode_auth_session(
        &self,
        subject: &str,
        method: AuthMethod,
    ) -> Result<String, AuthError> {
        let now = now_secs();
        self.codec.encode(&AuthSessionClaims {
            sub: subject.to_string(),
            kind: SessionKind::AuthSession,
            auth_method: method,
            exp: now + self.ttl.as_secs(),
            iat: now,
        })
    }

    /// Decodes an auth-session and returns the recorded method.
    pub fn decode_auth_session(&self, token: &str) -> Result<AuthMethod, TokenError> {
        let claims: AuthSessionClaims = self.codec.decode(token)?;
        if claims.kind != SessionKind::AuthSession {
            return Err(TokenError::Malformed);
        }
        Ok(claims.auth_method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SessionCodec {
        SessionCodec::new(
            &SecretString::from("session-secret-minimum-32-chars!!"),
            Duration::from_secs(3600),
        )
        .expect("valid codec")
    }

    fn attributes() -> FederationAttributes {
        let mut attributes = FederationAttributes {
            name_id: "_transient-alice".into(),
            session_index: Some("_session-1".into()),
            ..Default::default()
        };
        attributes
            .values
            .insert("mail".into(), vec!["alice@example.com".into()]);
        attributes
    }

    #[test]
    fn test_federation_session_round_trip() {
        let codec = codec();
        let token = codec.encode_federation(&attributes()).expect("encode");
        assert_eq!(codec.decode_federation(&token), Ok(attributes()));
    }

    #[test]
    fn test_auth_session_records_method() {
        let codec = codec();
        let token = codec
            .encode_auth_session("alice@example.com", AuthMethod::Federation)
            .expect("encode");
        assert_eq!(codec.decode_auth_session(&token), Ok(AuthMethod::Federation));
    }

    #[test]
    fn test_kinds_are_not_interchangeable() {
        let codec = codec();
        let federation = codec.encode_federation(&attributes()).expect("encode");
        let auth = codec
            .encode_auth_session("_transient-alice", AuthMethod::Federation)
            .expect("encode");

        assert!(codec.decode_auth_session(&federation).is_err());
        assert!(codec.decode_federation(&auth).is_err());
    }

    #[test]
    fn test_logout_ticket_is_not_a_session() {
        let codec = codec();
        let ticket = codec.encode_logout_ticket(&attributes()).expect("encode");
        let federation = codec.encode_federation(&attributes()).expect("encode");

        assert_eq!(codec.decode_logout_ticket(&ticket), Ok(attributes()));
        assert!(codec.decode_federation(&ticket).is_err());
        assert!(codec.decode_logout_ticket(&federation).is_err());
    }

    #[test]
    fn test_foreign_secret_is_rejected() {
        let other = SessionCodec::new(
            &SecretString::from("another-secret-minimum-32-chars!!"),
            Duration::from_secs(3600),
        )
        .expect("valid codec");
        let token = other.encode_federation(&attributes()).expect("encode");

        assert_eq!(
            codec().decode_federation(&token),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_rejects_zero_ttl() {
        let result = SessionCodec::new(&SecretString::from("secret"), Duration::ZERO);
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }
}
