//! Directory password login.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::SET_COOKIE, HeaderMap},
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use warden_auth::AuthMethod;

use crate::{
    cookies::{set_cookie, AUTH_SESSION_COOKIE, TOKEN_COOKIE},
    error::ApiError,
    state::AppState,
};

/// Body of `POST /ldap-login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Directory username.
    pub username: String,
    /// Directory password.
    pub password: SecretString,
}

/// Answer to a successful login.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Signed bearer token, also set as the `ldap_token` cookie.
    pub token: String,
}

/// `POST /ldap-login`
pub async fn ldap_login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|_| ApiError::bad_request("invalid request"))?;

    let outcome = state.login.login(&request.username, &request.password).await?;
    let auth_session = state
        .sessions
        .encode_auth_session(&outcome.principal.email, AuthMethod::Directory)?;

    let secure = state.settings.cookie_secure;
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        set_cookie(TOKEN_COOKIE, &outcome.token, state.tokens.expiry(), secure)?,
    );
    headers.append(
        SET_COOKIE,
        set_cookie(AUTH_SESSION_COOKIE, &auth_session, state.sessions.ttl(), secure)?,
    );

    Ok((
        headers,
        Json(LoginResponse {
            token: outcome.token,
        }),
    ))
}
