//! Directory error types.

use thiserror::Error;

/// Failures reported by a directory transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server answered with a non-success result code.
    #[error("directory rejected request (rc={code}): {message}")]
    Rejected {
        /// Protocol result code.
        code: u32,
        /// Diagnostic text from the server.
        message: String,
    },

    /// The transport failed (dial, I/O, protocol framing).
    #[error("directory transport failed: {0}")]
    Io(String),

    /// The operation did not complete within the configured bound.
    #[error("directory {0} timed out")]
    Timeout(&'static str),
}

/// Caller mistakes while verifying a password. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// No directory entry matches the login name.
    #[error("user not found")]
    NotFound,

    /// More than one directory entry matches the login name.
    #[error("login name matches more than one directory entry")]
    Ambiguous,

    /// The directory refused the supplied password.
    #[error("invalid credentials")]
    Invalid,
}

/// Errors returned by [`DirectoryManager`](crate::DirectoryManager).
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory is unreachable or the service bind failed.
    #[error("directory connection error: {0}")]
    Connection(String),

    /// The end-user credentials were rejected.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The verified entry has no canonical email.
    #[error("directory entry {dn} has no {attribute} attribute")]
    MissingAttribute {
        /// Distinguished name of the entry.
        dn: String,
        /// Attribute that was expected.
        attribute: String,
    },

    /// The manager was closed.
    #[error("directory manager is closed")]
    Closed,
}

impl DirectoryError {
    /// True for faults worth surfacing as a service outage.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_errors_are_not_connection_faults() {
        assert!(!DirectoryError::from(CredentialError::Invalid).is_connection());
        assert!(DirectoryError::Connection("refused".into()).is_connection());
        assert!(DirectoryError::Closed.is_connection());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Rejected {
            code: 49,
            message: "invalidCredentials".into(),
        };
        assert_eq!(
            err.to_string(),
            "directory rejected request (rc=49): invalidCredentials"
        );
        assert_eq!(
            TransportError::Timeout("search").to_string(),
            "directory search timed out"
        );
    }
}
