//! Authentication error types.

use thiserror::Error;
use warden_directory::{CredentialError, DirectoryError};
use warden_federation::ProtocolError;
use warden_storage::StorageError;

/// Bearer token and session token failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The token is past its expiry.
    #[error("token expired")]
    Expired,

    /// Wrong algorithm family or signature mismatch.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Undecodable, or required claims absent or mistyped.
    #[error("malformed token")]
    Malformed,
}

/// Identity verified but not allowed into the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    /// No employee record exists for the verified identity.
    #[error("identity is not provisioned for this application")]
    UnknownPrincipal,
}

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Directory unreachable or service bind failed.
    #[error("directory unavailable: {0}")]
    Connection(String),

    /// Username or password rejected.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Bearer or session token rejected.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Federation message rejected.
    #[error(transparent)]
    Protocol(ProtocolError),

    /// Verified identity has no application record.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Credential(e) => Self::Credential(e),
            // Without a mail attribute the identity cannot be mapped to an employee.
            DirectoryError::MissingAttribute { .. } => {
                Self::Authorization(AuthorizationError::UnknownPrincipal)
            },
            e @ (DirectoryError::Connection(_) | DirectoryError::Closed) => {
                Self::Connection(e.to_string())
            },
        }
    }
}

impl From<ProtocolError> for AuthError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Metadata(_) | ProtocolError::Configuration(_) => {
                Self::Configuration(err.to_string())
            },
            e => Self::Protocol(e),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
