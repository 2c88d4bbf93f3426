//! Logout.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap},
    response::Response,
};
use tracing::{info, warn};
use warden_auth::{session::LOGOUT_TICKET_TTL, LogoutTarget};

use super::found;
use crate::{
    cookies::{
        bearer_token, clear_cookie, cookie_value, set_cookie, ALL_COOKIES, AUTH_SESSION_COOKIE,
        FEDERATION_COOKIE, LOGOUT_TICKET_COOKIE,
    },
    error::ApiError,
    state::AppState,
};

/// `GET /logout`
///
/// Clears every credential carrier, deny-lists a presented bearer token and
/// redirects according to the recorded auth method. A federation session is
/// handed to `/saml/logout` as a short-lived logout ticket.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(token) = bearer_token(&headers) {
        match state.authenticator.revoke(&token).await {
            Ok(true) => info!("Bearer token revoked at logout"),
            Ok(false) => {},
            Err(e) => warn!(error = %e, "Could not revoke bearer token"),
        }
    }

    let auth_session = cookie_value(&headers, AUTH_SESSION_COOKIE);
    let target = state.authenticator.logout_target(auth_session.as_deref());

    let secure = state.settings.cookie_secure;
    let mut response_headers = HeaderMap::new();
    for name in ALL_COOKIES {
        response_headers.append(SET_COOKIE, clear_cookie(name, secure)?);
    }

    if target == LogoutTarget::Federation {
        let session = cookie_value(&headers, FEDERATION_COOKIE)
            .and_then(|session| state.sessions.decode_federation(&session).ok());
        if let Some(attributes) = session {
            let ticket = state.sessions.encode_logout_ticket(&attributes)?;
            response_headers.append(
                SET_COOKIE,
                set_cookie(LOGOUT_TICKET_COOKIE, &ticket, LOGOUT_TICKET_TTL, secure)?,
            );
        }
    }

    info!(redirect = target.path(), "Logged out");
    found(target.path(), response_headers)
}
