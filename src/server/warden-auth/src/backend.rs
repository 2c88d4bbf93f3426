//! Password verification backend trait.

use async_trait::async_trait;
use secrecy::SecretString;
use warden_directory::DirectoryManager;

use crate::AuthError;

/// Verifies end-user passwords.
///
/// Implementations return the canonical email of the verified identity.
#[async_trait]
pub trait PasswordVerifier: Send + Sync {
    /// Verifies `username`/`password` and returns the canonical email.
    async fn verify_password(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<String, AuthError>;

    /// Returns the name of this backend for logging/debugging.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl PasswordVerifier for DirectoryManager {
    async fn verify_password(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<String, AuthError> {
        Ok(self.authenticate(username, password).await?)
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}
