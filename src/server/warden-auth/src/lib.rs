//! # Warden Auth
//!
//! Authentication and authorization for Warden.
//!
//! ## Credential paths
//!
//! - Directory password login, answered with a self-issued bearer token
//! - Federation (SAML) session established by the ACS endpoint
//! - Bearer token presented by cookie or `Authorization` header
//!
//! [`HybridAuthenticator`] arbitrates among them for every protected request:
//! a valid, non-revoked bearer token wins, then an attribute-bearing
//! federation session, otherwise the request is denied.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod context;
pub mod decision;
pub mod error;
pub mod login;
pub mod resolver;
pub mod session;
pub mod token;

pub use backend::PasswordVerifier;
pub use context::{AuthMethod, Principal};
pub use decision::{AuthState, Credential, HybridAuthenticator, LogoutTarget, PresentedCredentials};
pub use error::{AuthError, AuthorizationError, TokenError};
pub use login::{DirectoryLogin, LoginOutcome};
pub use resolver::AuthorizationResolver;
pub use session::SessionCodec;
pub use token::{TokenClaims, TokenConfig, TokenService};
pub use warden_directory::CredentialError;
