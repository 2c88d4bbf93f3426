//! Self-issued bearer tokens.
//!
//! Tokens are HS256 JWTs carrying the subject email, its scopes and an
//! absolute expiry. Validation is a pure function of the secret and the
//! current time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{AuthError, TokenError};

/// Validation accepts the HMAC family only.
const ACCEPTED_ALGORITHMS: [Algorithm; 3] =
    [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

fn default_expiry_hours() -> u64 {
    1
}

/// Bearer token settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// HMAC signing secret.
    pub secret: SecretString,
    /// Token lifetime in hours.
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: u64,
}

impl TokenConfig {
    /// Creates a configuration.
    pub fn new(secret: impl Into<String>, expiry_hours: u64) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
            expiry_hours,
        }
    }

    /// Token lifetime.
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_hours * 3600)
    }
}

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject email.
    pub sub: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Expiration (Unix timestamp).
    pub exp: u64,
    /// Issued at (Unix timestamp).
    #[serde(default)]
    pub iat: u64,
}

/// HMAC JWT encoder/decoder shared by bearer and session tokens.
pub(crate) struct JwtCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtCodec {
    pub(crate) fn new(secret: &SecretString) -> Result<Self, AuthError> {
        let secret = secret.expose_secret();
        if secret.is_empty() {
            return Err(AuthError::Configuration("signing secret must not be empty".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub(crate) fn encode<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Configuration(format!("token signing failed: {e}")))
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        // jsonwebtoken cannot even represent `none`; look at the raw header
        // so a foreign algorithm is reported as a signature failure.
        check_header_algorithm(token)?;

        decode::<T>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            })
    }
}

fn check_header_algorithm(token: &str) -> Result<(), TokenError> {
    let mut segments = token.split('.');
    let (Some(header), Some(_), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Malformed);
    };

    let raw = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::Malformed)?;
    let header: serde_json::Value =
        serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)?;
    let alg = header
        .get("alg")
        .and_then(serde_json::Value::as_str)
        .ok_or(TokenError::Malformed)?;

    match alg {
        "HS256" | "HS384" | "HS512" => Ok(()),
        _ => Err(TokenError::InvalidSignature),
    }
}

/// Current Unix time in seconds.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Issues and validates bearer tokens.
pub struct TokenService {
    codec: JwtCodec,
    expiry: Duration,
}

impl TokenService {
    /// Creates a token service. Rejects an empty secret or zero lifetime.
    pub fn new(config: &TokenConfig) -> Result<Self, AuthError> {
        if config.expiry_hours == 0 {
            return Err(AuthError::Configuration("token expiry must be positive".into()));
        }
        Ok(Self {
            codec: JwtCodec::new(&config.secret)?,
            expiry: config.expiry(),
        })
    }

    /// Token lifetime.
    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Issues a token for `email` carrying `scopes`.
    pub fn issue(&self, email: &str, scopes: &[String]) -> Result<String, AuthError> {
        let now = now_secs();
        let claims = TokenClaims {
            sub: email.to_string(),
            scopes: scopes.to_vec(),
            exp: now + self.expiry.as_secs(),
            iat: now,
        };
        self.codec.encode(&claims)
    }

    /// Validates a token and returns its claims.
    pub fn validate(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let claims: TokenClaims = self.codec.decode(token)?;
        if claims.sub.is_empty() {
            return Err(TokenError::Malformed);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-minimum-32-chars!";

    fn service() -> TokenService {
        TokenService::new(&TokenConfig::new(SECRET, 1)).expect("valid config")
    }

    fn sign(header: Header, claims: &serde_json::Value, secret: &str) -> String {
        encode(&header, claims, &EncodingKey::from_secret(secret.as_bytes()))
            .expect("failed to encode JWT")
    }

    fn b64(value: &str) -> String {
        URL_SAFE_NO_PAD.encode(value)
    }

    #[test]
    fn test_round_trip() {
        let service = service();
        let scopes = vec!["read:reports".to_string(), "write:reports".to_string()];

        let token = service.issue("alice@example.com", &scopes).expect("issue failed");
        let claims = service.validate(&token).expect("validation failed");

        assert_eq!(claims.sub, "alice@example.com");
        assert_eq!(claims.scopes, scopes);
        assert_eq!(claims.exp, claims.iat + 3600);
    }

    #[test]
    fn test_round_trip_without_scopes() {
        let service = service();
        let token = service.issue("bob@example.com", &[]).expect("issue failed");
        let claims = service.validate(&token).expect("validation failed");
        assert!(claims.scopes.is_empty());
    }

    #[test]
    fn test_expired_token() {
        let claims = serde_json::json!({
            "sub": "alice@example.com",
            "scopes": ["read"],
            "exp": now_secs() - 10,
        });
        let token = sign(Header::default(), &claims, SECRET);

        assert_eq!(service().validate(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_other_hmac_variant_is_accepted() {
        let claims = serde_json::json!({
            "sub": "alice@example.com",
            "scopes": [],
            "exp": now_secs() + 60,
        });
        let token = sign(Header::new(Algorithm::HS512), &claims, SECRET);

        assert!(service().validate(&token).is_ok());
    }

    #[test]
    fn test_unsigned_token_is_invalid_signature() {
        let header = b64(r#"{"alg":"none","typ":"JWT"}"#);
        let payload = b64(&format!(
            r#"{{"sub":"mallory@example.com","scopes":["admin"],"exp":{}}}"#,
            now_secs() + 3600
        ));
        let token = format!("{header}.{payload}.");

        assert_eq!(service().validate(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_asymmetric_header_is_invalid_signature() {
        // An RS256 header over an HMAC signature (key confusion attempt).
        let valid = service().issue("mallory@example.com", &[]).expect("issue failed");
        let mut parts = valid.split('.');
        let (_, payload, signature) = (parts.next(), parts.next(), parts.next());
        let token = format!(
            "{}.{}.{}",
            b64(r#"{"alg":"RS256","typ":"JWT"}"#),
            payload.expect("payload"),
            signature.expect("signature")
        );

        assert_eq!(service().validate(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_different_secret_is_invalid_signature() {
        let other = TokenService::new(&TokenConfig::new("different-secret-key-minimum-32!", 1))
            .expect("valid config");
        let token = other.issue("alice@example.com", &[]).expect("issue failed");

        assert_eq!(service().validate(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_missing_claims_are_malformed() {
        let without_scopes = serde_json::json!({
            "sub": "alice@example.com",
            "exp": now_secs() + 60,
        });
        let without_exp = serde_json::json!({
            "sub": "alice@example.com",
            "scopes": [],
        });
        let wrong_shape = serde_json::json!({
            "sub": "alice@example.com",
            "scopes": "admin",
            "exp": now_secs() + 60,
        });

        for claims in [without_scopes, without_exp, wrong_shape] {
            let token = sign(Header::default(), &claims, SECRET);
            assert_eq!(service().validate(&token), Err(TokenError::Malformed));
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        let service = service();
        for token in ["", "abc", "a.b", "a.b.c.d", "!!!.e30.sig"] {
            assert_eq!(service.validate(token), Err(TokenError::Malformed), "{token}");
        }
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(matches!(
            TokenService::new(&TokenConfig::new("", 1)),
            Err(AuthError::Configuration(_))
        ));
        assert!(matches!(
            TokenService::new(&TokenConfig::new(SECRET, 0)),
            Err(AuthError::Configuration(_))
        ));
    }
}
