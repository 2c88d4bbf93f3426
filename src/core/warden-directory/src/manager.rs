//! Shared directory connection manager.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    config::DirectoryConfig,
    error::{CredentialError, DirectoryError, TransportError},
    transport::{DirectoryConnection, DirectoryConnector, DirectoryEntry, SearchScope},
};

const PROBE_FILTER: &str = "(objectClass=*)";
const NO_ATTRIBUTES: &str = "1.1";

/// Identity the shared connection is currently bound as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindState {
    /// No live connection.
    Disconnected,
    /// Bound as the configured service account.
    Service,
    /// Bound as an end user, mid-authentication or after a cancelled one.
    User(String),
}

struct DirectorySession {
    conn: Option<Box<dyn DirectoryConnection>>,
    bind_state: BindState,
    closed: bool,
}

impl DirectorySession {
    async fn drop_connection(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
        self.bind_state = BindState::Disconnected;
    }
}

/// Owns the single privileged directory connection.
///
/// Every directory round-trip happens with the session mutex held, so the
/// bind state observed by one caller cannot be changed by another mid-way.
pub struct DirectoryManager {
    config: DirectoryConfig,
    connector: Arc<dyn DirectoryConnector>,
    session: Mutex<DirectorySession>,
}

impl fmt::Debug for DirectoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryManager")
            .field("url", &self.config.url())
            .field("base_dn", &self.config.base_dn)
            .finish_non_exhaustive()
    }
}

impl DirectoryManager {
    /// Creates a manager without dialing. The first operation connects.
    pub fn new(config: DirectoryConfig, connector: Arc<dyn DirectoryConnector>) -> Self {
        Self {
            config,
            connector,
            session: Mutex::new(DirectorySession {
                conn: None,
                bind_state: BindState::Disconnected,
                closed: false,
            }),
        }
    }

    /// Creates a manager and establishes the service bind up front.
    pub async fn connect(
        config: DirectoryConfig,
        connector: Arc<dyn DirectoryConnector>,
    ) -> Result<Self, DirectoryError> {
        let manager = Self::new(config, connector);
        manager.ensure_connection().await?;
        info!(url = %manager.config.url(), "Directory connection established");
        Ok(manager)
    }

    /// Returns the connection settings.
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Probes the connection and reconnects if it is missing or dead.
    pub async fn ensure_connection(&self) -> Result<(), DirectoryError> {
        let mut session = self.session.lock().await;
        self.ensure_locked(&mut session).await
    }

    /// Verifies `username`/`password` and returns the entry's mail attribute.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<String, DirectoryError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(CredentialError::NotFound.into());
        }

        let mut session = self.session.lock().await;
        self.ensure_locked(&mut session).await?;

        let entry = self.find_user(&mut session, username).await?;

        // An empty simple bind is an anonymous bind and would always succeed.
        if password.expose_secret().is_empty() {
            debug!(username = %username, "Rejecting empty password");
            return Err(CredentialError::Invalid.into());
        }

        let verified = self.bind_user(&mut session, &entry.dn, password).await;
        self.restore_service_bind(&mut session).await;
        verified?;

        let mail = entry
            .first(&self.config.mail_attribute)
            .map(str::to_string)
            .ok_or_else(|| DirectoryError::MissingAttribute {
                dn: entry.dn.clone(),
                attribute: self.config.mail_attribute.clone(),
            })?;

        info!(username = %username, "Directory authentication succeeded");
        Ok(mail)
    }

    /// Runs the liveness probe, reconnecting if needed.
    pub async fn health_check(&self) -> Result<(), DirectoryError> {
        self.ensure_connection().await
    }

    /// Like [`health_check`](Self::health_check) but returns `None` instead of
    /// waiting when a request currently holds the connection.
    pub async fn try_health_check(&self) -> Option<Result<(), DirectoryError>> {
        let mut session = self.session.try_lock().ok()?;
        Some(self.ensure_locked(&mut session).await)
    }

    /// Releases the transport. Later operations fail with [`DirectoryError::Closed`].
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        if session.closed {
            return;
        }
        session.drop_connection().await;
        session.closed = true;
        info!("Directory connection closed");
    }

    /// Current bind state of the shared connection.
    pub async fn bind_state(&self) -> BindState {
        self.session.lock().await.bind_state.clone()
    }

    async fn ensure_locked(
        &self,
        session: &mut MutexGuard<'_, DirectorySession>,
    ) -> Result<(), DirectoryError> {
        if session.closed {
            return Err(DirectoryError::Closed);
        }

        // A caller dropped between its user bind and the re-bind leaves the
        // connection bound as that user.
        if session.conn.is_some() && session.bind_state != BindState::Service {
            warn!("Directory connection not bound as service account, re-binding");
            self.restore_service_bind(session).await;
        }

        if let Some(conn) = session.conn.as_mut() {
            let probe = self.bounded(
                "probe",
                conn.search(
                    &self.config.base_dn,
                    SearchScope::Base,
                    PROBE_FILTER,
                    &[NO_ATTRIBUTES],
                ),
            );
            match probe.await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "Directory liveness probe failed, reconnecting");
                    session.drop_connection().await;
                },
            }
        }

        let mut conn = self
            .bounded("connect", self.connector.connect(&self.config))
            .await
            .map_err(|e| DirectoryError::Connection(e.to_string()))?;

        let bound = self
            .bounded(
                "bind",
                conn.simple_bind(
                    &self.config.bind_dn,
                    self.config.bind_password.expose_secret(),
                ),
            )
            .await;
        if let Err(e) = bound {
            conn.close().await;
            return Err(DirectoryError::Connection(format!(
                "service bind failed: {e}"
            )));
        }

        session.conn = Some(conn);
        session.bind_state = BindState::Service;
        debug!(url = %self.config.url(), "Directory service bind established");
        Ok(())
    }

    async fn find_user(
        &self,
        session: &mut MutexGuard<'_, DirectorySession>,
        username: &str,
    ) -> Result<DirectoryEntry, DirectoryError> {
        let filter = format!(
            "({}={})",
            self.config.user_attribute,
            ldap3::ldap_escape(username)
        );

        let entries = match self.search_user(session, &filter).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(username = %username, stage = "search", error = %e, "Directory search failed, retrying once");
                session.drop_connection().await;
                self.ensure_locked(session).await?;
                self.search_user(session, &filter)
                    .await
                    .map_err(|e| DirectoryError::Connection(format!("user search failed: {e}")))?
            },
        };

        let mut entries = entries.into_iter();
        match (entries.next(), entries.next()) {
            (None, _) => {
                debug!(username = %username, "No directory entry matches");
                Err(CredentialError::NotFound.into())
            },
            (Some(entry), None) => Ok(entry),
            (Some(_), Some(_)) => {
                warn!(username = %username, "Login name matches multiple directory entries");
                Err(CredentialError::Ambiguous.into())
            },
        }
    }

    async fn search_user(
        &self,
        session: &mut MutexGuard<'_, DirectorySession>,
        filter: &str,
    ) -> Result<Vec<DirectoryEntry>, TransportError> {
        let conn = session
            .conn
            .as_mut()
            .ok_or_else(|| TransportError::Io("not connected".into()))?;
        let attrs = ["dn", "cn", self.config.mail_attribute.as_str()];
        self.bounded(
            "search",
            conn.search(&self.config.base_dn, SearchScope::Subtree, filter, &attrs),
        )
        .await
    }

    async fn bind_user(
        &self,
        session: &mut MutexGuard<'_, DirectorySession>,
        dn: &str,
        password: &SecretString,
    ) -> Result<(), DirectoryError> {
        if session.conn.is_none() {
            return Err(DirectoryError::Connection("not connected".into()));
        }

        // The server drops the previous identity as soon as the bind is sent.
        session.bind_state = BindState::User(dn.to_string());
        let Some(conn) = session.conn.as_mut() else {
            return Err(DirectoryError::Connection("not connected".into()));
        };
        match self
            .bounded("bind", conn.simple_bind(dn, password.expose_secret()))
            .await
        {
            Ok(()) => Ok(()),
            Err(TransportError::Rejected { code, .. }) => {
                debug!(dn = %dn, rc = code, "User bind rejected");
                Err(CredentialError::Invalid.into())
            },
            Err(e) => Err(DirectoryError::Connection(format!("user bind failed: {e}"))),
        }
    }

    async fn restore_service_bind(&self, session: &mut MutexGuard<'_, DirectorySession>) {
        let Some(conn) = session.conn.as_mut() else {
            session.bind_state = BindState::Disconnected;
            return;
        };

        let rebound = self
            .bounded(
                "bind",
                conn.simple_bind(
                    &self.config.bind_dn,
                    self.config.bind_password.expose_secret(),
                ),
            )
            .await;

        match rebound {
            Ok(()) => session.bind_state = BindState::Service,
            Err(e) => {
                warn!(error = %e, "Service re-bind failed, dropping directory connection");
                session.drop_connection().await;
            },
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        bounded(self.config.timeout(), operation, fut).await
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout(operation))?
}
