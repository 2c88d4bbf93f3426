//! # Warden Federation
//!
//! Service-provider side of the SAML 2.0 Web Browser SSO profile.
//!
//! ## Flow
//!
//! 1. [`FederationFlow::start_login`] builds an `AuthnRequest`, encodes it for
//!    the HTTP-Redirect binding and records a pending entry keyed by the
//!    request id together with a fresh relay state.
//! 2. The identity provider posts a `Response` back to the ACS endpoint.
//!    [`FederationFlow::resolve_response`] consumes the pending entry named by
//!    `InResponseTo` (exactly once), checks status, audience, timing and
//!    subject confirmation, delegates the XML signature check to a
//!    [`SignatureVerifier`] and returns the asserted attributes.
//!
//! Responses without a tracked request (IdP-initiated or replayed) are
//! always rejected.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod flow;
pub mod metadata;
pub mod request;
pub mod response;
pub mod tracker;
pub mod verify;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
mod xml;

pub use config::FederationConfig;
pub use error::ProtocolError;
pub use flow::{FederatedLogin, FederationFlow, LoginRedirect};
pub use metadata::{IdpMetadata, ServiceProviderMetadata};
pub use request::{AuthnRequest, Binding, LogoutRequest};
pub use response::{FederationAttributes, ResponseValidator};
pub use tracker::{PendingRequest, RequestTracker};
pub use verify::{InsecureSkipVerifier, SignatureVerifier, Xmlsec1Verifier};
