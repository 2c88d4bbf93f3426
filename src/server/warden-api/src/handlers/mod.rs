//! Route handlers.

pub mod directory;
pub mod federation;
pub mod health;
pub mod index;
pub mod logout;

use axum::{
    http::{header::LOCATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

/// `302 Found` to `location`, carrying `headers` (usually `Set-Cookie`).
pub(crate) fn found(location: &str, mut headers: HeaderMap) -> Result<Response, ApiError> {
    headers.insert(LOCATION, HeaderValue::from_str(location)?);
    Ok((StatusCode::FOUND, headers).into_response())
}

/// `302 Found` to the login page.
pub(crate) fn redirect_to_login() -> Response {
    (
        StatusCode::FOUND,
        [(LOCATION, HeaderValue::from_static("/login"))],
    )
        .into_response()
}
