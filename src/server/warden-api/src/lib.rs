//! # Warden API
//!
//! HTTP surface of the Warden gateway.
//!
//! ## Endpoints
//!
//! - `GET /login` - Credential-choice page
//! - `POST /ldap-login` - Directory password login, answered with a bearer token
//! - `GET /sso-login` - Redirect to the identity provider
//! - `POST /saml/acs` - Assertion consumer service
//! - `GET /saml/metadata` - Service provider metadata
//! - `GET /saml/logout` - Federation single logout
//! - `GET /logout` - Clears every credential carrier
//! - `GET /health` - Liveness and directory health
//! - `GET /static/*` - Static assets
//! - `GET /` - Protected; requires an authenticated principal

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cookies;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod state;


use std::sync::Arc;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header::CACHE_CONTROL, HeaderValue, Request},
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info_span, Span};

pub use error::ApiError;
pub use state::{ApiSettings, AppState};

const STATIC_CACHE_CONTROL: &str = "public, max-age=3600";

/// Builds the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/", get(handlers::index::index))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            guard::require_principal,
        ));

    let static_files = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(STATIC_CACHE_CONTROL),
        ))
        .service(ServeDir::new(&state.settings.static_dir));

    Router::new()
        .route_service("/login", ServeFile::new(&state.settings.login_page))
        .route("/ldap-login", post(handlers::directory::ldap_login))
        .route("/sso-login", get(handlers::federation::sso_login))
        .route("/saml/acs", post(handlers::federation::assertion_consumer))
        .route("/saml/metadata", get(handlers::federation::metadata))
        .route("/saml/logout", get(handlers::federation::single_logout))
        .route("/logout", get(handlers::logout::logout))
        .route("/health", get(handlers::health::health))
        .nest_service("/static", static_files)
        .merge(protected)
        .layer(TraceLayer::new_for_http().make_span_with(make_span))
        .with_state(state)
}

fn make_span(request: &Request<Body>) -> Span {
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        http.path = request.uri().path(),
    )
}
