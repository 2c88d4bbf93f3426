//! Transport seam between the manager and a directory protocol client.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{config::DirectoryConfig, error::TransportError};

/// Search depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Only the base object itself.
    Base,
    /// The base object and everything below it.
    Subtree,
}

/// A search result entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name.
    pub dn: String,
    /// Attribute values keyed by attribute name.
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// First value of `name`, if any.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Opens transport connections.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Dials the directory described by `config`. Does not bind.
    async fn connect(
        &self,
        config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectoryConnection>, TransportError>;
}

/// One live transport connection.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind; replaces the connection's current identity.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), TransportError>;

    /// Runs a search and returns the matching entries.
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, TransportError>;

    /// Unbinds and releases the transport. Errors are ignored.
    async fn close(&mut self);
}
