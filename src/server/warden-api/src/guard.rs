//! Guard for protected routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::{cookies::presented_credentials, handlers::redirect_to_login, state::AppState};

/// Runs the hybrid decision and either attaches the [`warden_auth::Principal`]
/// as a request extension or redirects to `/login`.
pub async fn require_principal(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = presented_credentials(request.headers());
    let decision = state.authenticator.authenticate(&presented).await;

    match decision.into_principal() {
        Some(principal) => {
            debug!(
                email = %principal.email,
                method = principal.auth_method.as_str(),
                "Request authenticated"
            );
            request.extensions_mut().insert(principal);
            next.run(request).await
        },
        None => {
            debug!(path = %request.uri().path(), "No acceptable credential, redirecting to login");
            redirect_to_login()
        },
    }
}
