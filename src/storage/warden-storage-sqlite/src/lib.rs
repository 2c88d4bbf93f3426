//! # Warden Storage - SQLite Backend
//!
//! SQLite implementation of the identity and revocation stores. The backend
//! creates its own schema on open, which makes it suitable for development
//! gateways and tests. Production deployments point at PostgreSQL instead.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use warden_storage::{Employee, IdentityStore, RevocationStore, StorageError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS employees (
    id     INTEGER PRIMARY KEY AUTOINCREMENT,
    uid    TEXT NOT NULL UNIQUE,
    name   TEXT,
    email  TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS scopes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT
);

CREATE TABLE IF NOT EXISTS employee_scopes (
    employee_id INTEGER NOT NULL REFERENCES employees (id),
    scope_id    INTEGER NOT NULL REFERENCES scopes (id),
    PRIMARY KEY (employee_id, scope_id)
);

CREATE TABLE IF NOT EXISTS token_blacklist (
    token      TEXT PRIMARY KEY,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_token_blacklist_expires ON token_blacklist (expires_at)
"#;

/// SQLite identity store.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Opens or creates a SQLite database file and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the
    /// connection fails, or schema creation fails.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::ConnectionFailed(format!("failed to create directory: {e}"))
                })?;
            }
        }

        Self::connect(&format!("sqlite:{}?mode=rwc", path.display())).await
    }

    /// Connects using a `sqlite:` URL and ensures the schema exists.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        if !url.starts_with("sqlite:") {
            return Err(StorageError::InvalidInput(format!(
                "not a sqlite url: {url}"
            )));
        }

        debug!(url = %url, "Opening SQLite database");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let backend = Self { pool };
        backend.migrate().await?;

        info!("SQLite backend ready");

        Ok(backend)
    }

    /// Creates the identity and revocation tables.
    async fn migrate(&self) -> Result<(), StorageError> {
        debug!("Running database migrations");
        self.execute_raw(SCHEMA)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
        debug!("Migrations complete");
        Ok(())
    }

    /// Executes raw SQL statements separated by `;`.
    pub async fn execute_raw(&self, sql: &str) -> Result<(), StorageError> {
        for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement.trim())
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Inserts an employee row and returns its id.
    ///
    /// Used by development fixtures; the gateway itself never writes employees.
    pub async fn insert_employee(
        &self,
        uid: &str,
        name: Option<&str>,
        email: &str,
    ) -> Result<i64, StorageError> {
        let row: (i64,) =
            sqlx::query_as("INSERT INTO employees (uid, name, email) VALUES (?, ?, ?) RETURNING id")
                .bind(uid)
                .bind(name)
                .bind(email)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(row.0)
    }

    /// Grants a scope to an employee, creating the scope if it does not exist.
    pub async fn grant_scope(&self, employee_id: i64, scope: &str) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO scopes (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(scope)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO employee_scopes (employee_id, scope_id)
            SELECT ?, id FROM scopes WHERE name = ?
            ON CONFLICT(employee_id, scope_id) DO NOTHING
            "#,
        )
        .bind(employee_id)
        .bind(scope)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl IdentityStore for SqliteBackend {
    async fn find_employee_by_email(&self, email: &str) -> Result<Option<Employee>, StorageError> {
        let row: Option<(i64, String, Option<String>, String)> =
            sqlx::query_as("SELECT id, uid, name, email FROM employees WHERE email = ?")
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
            WHERE es.employee_id = ?
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
impl RevocationStore for SqliteBackend {
    async fn revoke(&self, fingerprint: &str, expires_at: i64) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO token_blacklist (token, expires_at) VALUES (?, ?)
            ON CONFLICT(token) DO UPDATE SET expires_at = excluded.expires_at
            "#,
        )
        .bind(fingerprint)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn is_revoked(&self, fingerprint: &str) -> Result<bool, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM token_blacklist WHERE token = ?")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
