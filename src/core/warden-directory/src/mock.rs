//! In-memory directory for tests.
//!
//! Implements the transport traits over a shared user table and records how
//! the manager drives it: bind identity per live connection, overlapping
//! operations and searches issued while bound as an end user.

#![allow(clippy::disallowed_methods)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;

use crate::{
    config::DirectoryConfig,
    error::TransportError,
    transport::{DirectoryConnection, DirectoryConnector, DirectoryEntry, SearchScope},
};

const BASE_DN: &str = "dc=example,dc=com";
const SERVICE_DN: &str = "cn=admin,dc=example,dc=com";
const SERVICE_PASSWORD: &str = "admin-secret";
const INVALID_CREDENTIALS: u32 = 49;

#[derive(Debug, Clone)]
struct MockUser {
    dn: String,
    uid: String,
    mail: Option<String>,
    password: String,
}

#[derive(Debug, Default)]
struct MockState {
    users: Vec<MockUser>,
    reachable: bool,
    latency: Option<Duration>,
    generation: u64,
    next_conn_id: u64,
    bindings: HashMap<u64, Option<String>>,
    connects: usize,
    probes: usize,
    user_bind_attempts: usize,
    fail_searches: u32,
    fail_service_binds: u32,
    active: usize,
    max_active: usize,
    searches_while_user_bound: usize,
    last_filter: Option<String>,
}

/// Shared handle to an in-memory directory.
#[derive(Debug, Clone)]
pub struct MockDirectory {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDirectory {
    /// Creates an empty, reachable directory.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                reachable: true,
                ..Default::default()
            })),
        }
    }

    /// Configuration matching this directory's service account.
    pub fn config(&self) -> DirectoryConfig {
        DirectoryConfig::new(
            "mock.invalid",
            BASE_DN,
            SERVICE_DN,
            SecretString::from(SERVICE_PASSWORD),
        )
    }

    /// Distinguished name of the service account.
    pub fn service_dn(&self) -> String {
        SERVICE_DN.to_string()
    }

    /// Adds a user under `ou=people`.
    pub fn add_user(&self, uid: &str, mail: &str, password: &str) {
        self.add_user_in(uid, "ou=people", mail, password);
    }

    /// Adds a user under the given organizational unit.
    pub fn add_user_in(&self, uid: &str, ou: &str, mail: &str, password: &str) {
        self.push_user(uid, ou, Some(mail), password);
    }

    /// Adds a user that has no mail attribute.
    pub fn add_user_without_mail(&self, uid: &str, password: &str) {
        self.push_user(uid, "ou=people", None, password);
    }

    fn push_user(&self, uid: &str, ou: &str, mail: Option<&str>, password: &str) {
        self.state.lock().users.push(MockUser {
            dn: format!("uid={uid},{ou},{BASE_DN}"),
            uid: uid.to_string(),
            mail: mail.map(str::to_string),
            password: password.to_string(),
        });
    }

    /// Makes new dials fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Delays every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Breaks every open connection, as a server restart would.
    pub fn reset_connections(&self) {
        self.state.lock().generation += 1;
    }

    /// Fails the next `n` subtree searches with a transport error.
    pub fn fail_next_searches(&self, n: u32) {
        self.state.lock().fail_searches = n;
    }

    /// Rejects the next `n` service-account binds.
    pub fn fail_next_service_binds(&self, n: u32) {
        self.state.lock().fail_service_binds = n;
    }

    /// Number of transports opened.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of base-scope liveness probes received.
    pub fn probe_count(&self) -> usize {
        self.state.lock().probes
    }

    /// Number of binds attempted with a user DN.
    pub fn user_bind_attempts(&self) -> usize {
        self.state.lock().user_bind_attempts
    }

    /// Bind identity of each open connection (`None` when anonymous).
    pub fn live_bindings(&self) -> Vec<Option<String>> {
        self.state.lock().bindings.values().cloned().collect()
    }

    /// Highest number of operations observed in flight at once.
    pub fn max_concurrent_operations(&self) -> usize {
        self.state.lock().max_active
    }

    /// Searches issued while the connection was bound as an end user.
    pub fn searches_while_user_bound(&self) -> usize {
        self.state.lock().searches_while_user_bound
    }

    /// Filter of the most recent subtree search.
    pub fn last_filter(&self) -> Option<String> {
        self.state.lock().last_filter.clone()
    }
}

#[async_trait]
impl DirectoryConnector for MockDirectory {
    async fn connect(
        &self,
        _config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectoryConnection>, TransportError> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if !state.reachable {
            return Err(TransportError::Io("connection refused".into()));
        }
        state.connects += 1;
        state.next_conn_id += 1;
        let id = state.next_conn_id;
        state.bindings.insert(id, None);

        Ok(Box::new(MockConnection {
            id,
            generation: state.generation,
            directory: self.clone(),
        }))
    }
}

struct MockConnection {
    id: u64,
    generation: u64,
    directory: MockDirectory,
}

impl MockConnection {
    /// Marks an operation in flight and yields so overlapping callers show up.
    async fn enter(&self) -> Result<(), TransportError> {
        let latency = {
            let mut state = self.directory.state.lock();
            state.active += 1;
            state.max_active = state.max_active.max(state.active);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        let state = self.directory.state.lock();
        if state.generation != self.generation {
            return Err(TransportError::Io("connection reset by peer".into()));
        }
        Ok(())
    }

    fn exit(&self) {
        self.directory.state.lock().active -= 1;
    }

    fn bind(&self, dn: &str, password: &str) -> Result<(), TransportError> {
        let mut state = self.directory.state.lock();
        // A bind attempt discards the previous identity whatever the outcome.
        state.bindings.insert(self.id, None);

        let accepted = if dn == SERVICE_DN {
            if state.fail_service_binds > 0 {
                state.fail_service_binds -= 1;
                false
            } else {
                password == SERVICE_PASSWORD
            }
        } else {
            state.user_bind_attempts += 1;
            state
                .users
                .iter()
                .any(|user| user.dn == dn && user.password == password)
        };

        if !accepted {
            return Err(TransportError::Rejected {
                code: INVALID_CREDENTIALS,
                message: "invalidCredentials".into(),
            });
        }
        state.bindings.insert(self.id, Some(dn.to_string()));
        Ok(())
    }

    fn lookup(
        &self,
        scope: SearchScope,
        filter: &str,
    ) -> Result<Vec<DirectoryEntry>, TransportError> {
        let mut state = self.directory.state.lock();

        if let Some(Some(bound)) = state.bindings.get(&self.id) {
            if bound != SERVICE_DN {
                state.searches_while_user_bound += 1;
            }
        }

        if scope == SearchScope::Base {
            state.probes += 1;
            return Ok(vec![DirectoryEntry {
                dn: BASE_DN.to_string(),
                ..Default::default()
            }]);
        }

        state.last_filter = Some(filter.to_string());
        if state.fail_searches > 0 {
            state.fail_searches -= 1;
            return Err(TransportError::Io("broken pipe".into()));
        }

        let wanted = filter
            .strip_prefix("(uid=")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or_default();

        Ok(state
            .users
            .iter()
            .filter(|user| user.uid == wanted)
            .map(|user| {
                let mut attrs = HashMap::new();
                attrs.insert("cn".to_string(), vec![user.uid.clone()]);
                if let Some(mail) = &user.mail {
                    attrs.insert("mail".to_string(), vec![mail.clone()]);
                }
                DirectoryEntry {
                    dn: user.dn.clone(),
                    attrs,
                }
            })
            .collect())
    }
}

#[async_trait]
impl DirectoryConnection for MockConnection {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), TransportError> {
        let result = match self.enter().await {
            Ok(()) => self.bind(dn, password),
            Err(e) => Err(e),
        };
        self.exit();
        result
    }

    async fn search(
        &mut self,
        _base: &str,
        scope: SearchScope,
        filter: &str,
        _attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, TransportError> {
        let result = match self.enter().await {
            Ok(()) => self.lookup(scope, filter),
            Err(e) => Err(e),
        };
        self.exit();
        result
    }

    async fn close(&mut self) {
        self.directory.state.lock().bindings.remove(&self.id);
    }
}
