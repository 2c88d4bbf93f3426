//! The protected landing page.

use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use warden_auth::{AuthMethod, Principal};

/// `GET /`
pub async fn index(Extension(principal): Extension<Principal>) -> impl IntoResponse {
    let body = match (&principal.auth_method, &principal.attributes) {
        (AuthMethod::Federation, Some(attributes)) => {
            let released: String = attributes
                .values
                .iter()
                .map(|(name, values)| format!("- {name}: {}\n", values.join(", ")))
                .collect();
            format!(
                "Logged in via SAML\n\nEmail: {}\nNameID: {}\n\nAttributes:\n{released}",
                principal.email, attributes.name_id
            )
        },
        _ => format!(
            "Logged in via {} token\n\nEmail: {}\nScopes: {}\n",
            principal.auth_method.as_str(),
            principal.email,
            principal.scopes.join(", ")
        ),
    };

    ([(CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}
