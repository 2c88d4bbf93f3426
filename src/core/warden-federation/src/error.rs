//! Federation protocol errors.

use thiserror::Error;

/// Errors raised while building requests or validating responses.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The response does not answer a request this gateway issued, or the
    /// request expired or was already answered.
    #[error("response does not match any pending request")]
    UnmatchedResponse,

    /// The message could not be decoded or parsed.
    #[error("malformed federation message: {0}")]
    MalformedMessage(String),

    /// The assertion failed a status, audience, timing or subject check.
    #[error("invalid assertion: {0}")]
    InvalidAssertion(String),

    /// The XML signature is missing, misplaced or does not verify.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Identity provider metadata could not be loaded or lacks a required
    /// endpoint.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Service provider configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ProtocolError {
    /// True when the caller sent something bad, as opposed to a local fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Metadata(_) | Self::Configuration(_))
    }
}
