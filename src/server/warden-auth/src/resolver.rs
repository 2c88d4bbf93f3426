//! Maps verified identities to their scopes.

use std::sync::Arc;

use tracing::{debug, warn};
use warden_storage::IdentityStore;

use crate::error::{AuthError, AuthorizationError};

/// Resolves an email to the scope names granted to its employee record.
#[derive(Clone)]
pub struct AuthorizationResolver {
    store: Arc<dyn IdentityStore>,
}

impl AuthorizationResolver {
    /// Creates a resolver over `store`.
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Returns the sorted, deduplicated scopes for `email`.
    ///
    /// Fails with [`AuthorizationError::UnknownPrincipal`] when no employee
    /// has that email.
    pub async fn resolve_scopes(&self, email: &str) -> Result<Vec<String>, AuthError> {
        let Some(employee) = self.store.find_employee_by_email(email.trim()).await? else {
            warn!(email = %email, "Verified identity has no employee record");
            return Err(AuthorizationError::UnknownPrincipal.into());
        };

        let mut scopes = self.store.scopes_for_employee(employee.id).await?;
        scopes.sort();
        scopes.dedup();

        debug!(email = %email, employee_id = employee.id, scopes = ?scopes, "Resolved scopes");
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use warden_storage::{Employee, StorageError};
    use warden_storage_sqlite::SqliteBackend;

    async fn store() -> (tempfile::TempDir, Arc<SqliteBackend>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = SqliteBackend::open(dir.path().join("warden.db"))
            .await
            .expect("open sqlite");
        (dir, Arc::new(backend))
    }

    #[tokio::test]
    async fn test_resolves_granted_scopes() {
        let (_dir, backend) = store().await;
        let alice = backend
            .insert_employee("alice", Some("Alice"), "alice@example.com")
            .await
            .expect("insert");
        backend.grant_scope(alice, "write:reports").await.expect("grant");
        backend.grant_scope(alice, "read:reports").await.expect("grant");

        let resolver = AuthorizationResolver::new(backend);
        let scopes = resolver
            .resolve_scopes("alice@example.com")
            .await
            .expect("resolve");

        assert_eq!(scopes, vec!["read:reports", "write:reports"]);
    }

    #[tokio::test]
    async fn test_employee_without_grants_has_no_scopes() {
        let (_dir, backend) = store().await;
        backend
            .insert_employee("bob", None, "bob@example.com")
            .await
            .expect("insert");

        let resolver = AuthorizationResolver::new(backend);
        let scopes = resolver.resolve_scopes("bob@example.com").await.expect("resolve");
        assert!(scopes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_email_is_unknown_principal() {
        let (_dir, backend) = store().await;
        let resolver = AuthorizationResolver::new(backend);

        let result = resolver.resolve_scopes("ghost@example.com").await;
        assert!(matches!(
            result,
            Err(AuthError::Authorization(AuthorizationError::UnknownPrincipal))
        ));
    }

    struct DuplicatingStore;

    #[async_trait]
    impl IdentityStore for DuplicatingStore {
        async fn find_employee_by_email(
            &self,
            email: &str,
        ) -> Result<Option<Employee>, StorageError> {
            Ok(Some(Employee {
                id: 7,
                uid: "carol".into(),
                name: None,
                email: email.into(),
            }))
        }

        async fn scopes_for_employee(&self, _id: i64) -> Result<Vec<String>, StorageError> {
            Ok(vec!["b".into(), "a".into(), "b".into()])
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_duplicates_collapse() {
        let resolver = AuthorizationResolver::new(Arc::new(DuplicatingStore));
        let scopes = resolver.resolve_scopes("carol@example.com").await.expect("resolve");
        assert_eq!(scopes, vec!["a", "b"]);
    }

    struct BrokenStore;

    #[async_trait]
    impl IdentityStore for BrokenStore {
        async fn find_employee_by_email(&self, _: &str) -> Result<Option<Employee>, StorageError> {
            Err(StorageError::ConnectionFailed("pool closed".into()))
        }

        async fn scopes_for_employee(&self, _: i64) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Err(StorageError::ConnectionFailed("pool closed".into()))
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_not_authorization_failure() {
        let resolver = AuthorizationResolver::new(Arc::new(BrokenStore));
        let result = resolver.resolve_scopes("alice@example.com").await;
        assert!(matches!(result, Err(AuthError::Storage(_))));
    }
}
