//! # Warden Directory
//!
//! Maintains one privileged connection to the directory service and verifies
//! end-user passwords against it.
//!
//! ## Connection model
//!
//! The manager owns a single connection bound as the configured service
//! account. Every operation (liveness probe, user search, user bind, service
//! re-bind) runs under one mutex, so a user bind can never interleave with
//! another caller's search. After each password check the connection is
//! re-bound as the service account; if that fails the connection is dropped
//! and the next caller reconnects.
//!
//! A [`HealthMonitor`] probes the connection on its own timer and reports to a
//! [`HealthObserver`] without blocking requests that already hold the lock.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod health;
pub mod ldap;
pub mod manager;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod transport;

pub use config::DirectoryConfig;
pub use error::{CredentialError, DirectoryError, TransportError};
pub use health::{HealthMonitor, HealthObserver, HealthReport, HealthStatus};
pub use ldap::Ldap3Connector;
pub use manager::{BindState, DirectoryManager};
pub use transport::{DirectoryConnection, DirectoryConnector, DirectoryEntry, SearchScope};
