//! # Warden Storage - PostgreSQL Backend
//!
//! Reads employees and scope grants from the application database. The schema
//! (`employees`, `scopes`, `employee_scopes`, `token_blacklist`) is owned by the
//! migration tooling; this backend never creates or alters tables.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use warden_storage::{Employee, IdentityStore, RevocationStore, StorageError};

/// Connection pool sizing.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Connections kept warm.
    pub min_connections: u32,
    /// Connections are recycled after this age.
    pub max_lifetime: Duration,
    /// Idle connections above `min_connections` are closed after this long.
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            max_lifetime: Duration::from_secs(60 * 60),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// PostgreSQL identity store.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connects to `url` and pings the server once.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ConnectionFailed`] if the pool cannot be
    /// established or the initial ping fails.
    pub async fn connect(url: &str, settings: &PoolSettings) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .max_lifetime(settings.max_lifetime)
            .idle_timeout(settings.idle_timeout)
            .connect(url)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let backend = Self { pool };
        backend.ping().await?;

        info!(
            max_connections = settings.max_connections,
            "PostgreSQL backend ready"
        );

        Ok(backend)
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}

#[async_trait]
impl IdentityStore for PostgresBackend {
    async fn find_employee_by_email(&self, email: &str) -> Result<Option<Employee>, StorageError> {
        let row: Option<(i64, String, Option<String>, String)> = sqlx::query_as(
            "SELECT id::BIGINT, uid, name, email FROM employees WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.map(|(id, uid, name, email)| Employee {
            id,
            uid,
            name,
            email,
        }))
    }

    async fn scopes_for_employee(&self, employee_id: i64) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT s.name FROM scopes s
            JOIN employee_scopes es ON es.scope_id = s.id
            WHERE es.employee_id = $1
            "#,
        )
        .bind(employee_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RevocationStore for PostgresBackend {
    async fn revoke(&self, fingerprint: &str, expires_at: i64) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO token_blacklist (token, expires_at) VALUES ($1, to_timestamp($2))
            ON CONFLICT (token) DO UPDATE SET expires_at = excluded.expires_at
            "#,
        )
        .bind(fingerprint)
        .bind(expires_at as f64)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn is_revoked(&self, fingerprint: &str) -> Result<bool, StorageError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM token_blacklist WHERE token = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE expires_at < to_timestamp($1)")
            .bind(now as f64)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
