//! Storage backend trait definitions.

use async_trait::async_trait;

use crate::{error::StorageError, model::Employee};

/// Read access to employees and their scope grants.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Looks up an employee by canonical email.
    async fn find_employee_by_email(&self, email: &str) -> Result<Option<Employee>, StorageError>;

    /// Returns the scope names granted to an employee.
    ///
    /// Order is unspecified and duplicates are possible; callers normalise.
    async fn scopes_for_employee(&self, employee_id: i64) -> Result<Vec<String>, StorageError>;

    /// Cheap round-trip used by health reporting.
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Deny-list of bearer tokens revoked before their natural expiry.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Records a token fingerprint as revoked until `expires_at` (Unix seconds).
    async fn revoke(&self, fingerprint: &str, expires_at: i64) -> Result<(), StorageError>;

    /// Returns true if the fingerprint is on the deny-list.
    async fn is_revoked(&self, fingerprint: &str) -> Result<bool, StorageError>;

    /// Removes entries whose tokens expired before `now`. Returns the number removed.
    async fn purge_expired(&self, now: i64) -> Result<u64, StorageError>;
}
