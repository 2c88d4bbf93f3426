//! Credential carriers: cookies and the `Authorization` header.

use std::time::Duration;

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use warden_auth::PresentedCredentials;

/// Bearer token minted by directory login.
pub const TOKEN_COOKIE: &str = "ldap_token";
/// Federation session.
pub const FEDERATION_COOKIE: &str = "saml_token";
/// Records which method logged the browser in.
pub const AUTH_SESSION_COOKIE: &str = "auth_session";
/// Hands an ended federation session from `/logout` to `/saml/logout`.
pub const LOGOUT_TICKET_COOKIE: &str = "saml_logout";

/// Every cookie logout has to clear.
pub const ALL_COOKIES: [&str; 3] = [TOKEN_COOKIE, FEDERATION_COOKIE, AUTH_SESSION_COOKIE];

/// Builds an `HttpOnly` cookie living for `max_age`.
pub fn set_cookie(
    name: &str,
    value: &str,
    max_age: Duration,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Builds a cookie that expires `name` immediately.
pub fn clear_cookie(name: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Non-empty value of cookie `name`.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Token from an `Authorization: Bearer` header.
pub fn bearer_header(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Bearer token from the header, else from the token cookie.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    bearer_header(headers).or_else(|| cookie_value(headers, TOKEN_COOKIE))
}

/// Collects the carriers the decision procedure inspects.
pub fn presented_credentials(headers: &HeaderMap) -> PresentedCredentials {
    PresentedCredentials {
        bearer: bearer_token(headers),
        federation_session: cookie_value(headers, FEDERATION_COOKIE),
    }
}
