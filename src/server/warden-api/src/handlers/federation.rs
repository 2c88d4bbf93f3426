//! SAML service provider endpoints.

use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, Query, State},
    http::{
        header::{CONTENT_TYPE, SET_COOKIE},
        HeaderMap,
    },
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use tracing::{info, warn};
use warden_auth::{AuthError, AuthMethod, Principal};
use warden_federation::FederationAttributes;

use super::found;
use crate::{
    cookies::{
        clear_cookie, cookie_value, set_cookie, AUTH_SESSION_COOKIE, FEDERATION_COOKIE,
        LOGOUT_TICKET_COOKIE,
    },
    error::ApiError,
    state::AppState,
};

/// Query of `GET /sso-login`.
#[derive(Debug, Default, Deserialize)]
pub struct SsoLoginParams {
    /// Local path to land on after login.
    pub return_to: Option<String>,
}

/// Form posted by the identity provider.
#[derive(Debug, Deserialize)]
pub struct AcsForm {
    /// Base64 `samlp:Response`.
    #[serde(rename = "SAMLResponse")]
    pub saml_response: String,
    /// Echoed relay state.
    #[serde(rename = "RelayState", default)]
    pub relay_state: String,
}

/// `GET /sso-login`
pub async fn sso_login(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SsoLoginParams>,
) -> Result<Response, ApiError> {
    let return_to = params.return_to.as_deref().unwrap_or("/");
    let redirect = state
        .federation
        .start_login(return_to)
        .map_err(AuthError::from)?;
    found(redirect.url.as_str(), HeaderMap::new())
}

/// `POST /saml/acs`
pub async fn assertion_consumer(
    State(state): State<Arc<AppState>>,
    form: Result<Form<AcsForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(form) = form.map_err(|_| ApiError::bad_request("invalid SAML response form"))?;

    let login = state
        .federation
        .resolve_response(&form.saml_response, &form.relay_state)
        .await
        .map_err(|e| {
            warn!(error = %e, "Rejected SAML response");
            AuthError::from(e)
        })?;

    let federation_session = state.sessions.encode_federation(&login.attributes)?;
    let principal = Principal::from_federation(login.attributes);
    let auth_session = state
        .sessions
        .encode_auth_session(&principal.email, AuthMethod::Federation)?;

    let secure = state.settings.cookie_secure;
    let ttl = state.sessions.ttl();
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        set_cookie(FEDERATION_COOKIE, &federation_session, ttl, secure)?,
    );
    headers.append(
        SET_COOKIE,
        set_cookie(AUTH_SESSION_COOKIE, &auth_session, ttl, secure)?,
    );

    info!(email = %principal.email, "Federation session established");
    found(&login.return_to, headers)
}

/// `GET /saml/metadata`
pub async fn metadata(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "application/samlmetadata+xml")],
        state.federation.metadata_xml(),
    )
}

/// `GET /saml/logout`
///
/// Ends the federation session. If the session (or the logout ticket left
/// by `/logout`) is presented and the IdP offers single logout, the browser
/// continues to the IdP.
pub async fn single_logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let attributes: Option<FederationAttributes> = cookie_value(&headers, FEDERATION_COOKIE)
        .and_then(|session| state.sessions.decode_federation(&session).ok())
        .or_else(|| {
            cookie_value(&headers, LOGOUT_TICKET_COOKIE)
                .and_then(|ticket| state.sessions.decode_logout_ticket(&ticket).ok())
        });

    let secure = state.settings.cookie_secure;
    let mut response_headers = HeaderMap::new();
    for name in [FEDERATION_COOKIE, AUTH_SESSION_COOKIE, LOGOUT_TICKET_COOKIE] {
        response_headers.append(SET_COOKIE, clear_cookie(name, secure)?);
    }

    let idp_logout = attributes.and_then(|attributes| {
        state
            .federation
            .logout_redirect(&attributes)
            .inspect_err(|e| warn!(error = %e, "Could not build SAML logout request"))
            .ok()
            .flatten()
    });

    match idp_logout {
        Some(url) => {
            info!("Redirecting to IdP single logout");
            found(url.as_str(), response_headers)
        },
        None => found("/login", response_headers),
    }
}
