//! LDAP transport backed by `ldap3`.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};
use tracing::{debug, warn};

use crate::{
    config::DirectoryConfig,
    error::TransportError,
    transport::{DirectoryConnection, DirectoryConnector, DirectoryEntry, SearchScope},
};

/// Dials real directory servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ldap3Connector;

impl Ldap3Connector {
    /// Creates a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(
        &self,
        config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectoryConnection>, TransportError> {
        let url = config.url();
        let settings = LdapConnSettings::new()
            .set_conn_timeout(config.timeout())
            .set_no_tls_verify(config.insecure_skip_tls_verify);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(io_error)?;

        // The driver owns the socket; it exits once the handle unbinds.
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver stopped");
            }
        });

        debug!(url = %url, "LDAP transport opened");
        Ok(Box::new(Ldap3Connection { ldap }))
    }
}

struct Ldap3Connection {
    ldap: Ldap,
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), TransportError> {
        let result = self
            .ldap
            .simple_bind(dn, password)
            .await
            .map_err(io_error)?;

        if result.rc != 0 {
            return Err(TransportError::Rejected {
                code: result.rc,
                message: result.text,
            });
        }
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, TransportError> {
        let scope = match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::Subtree => Scope::Subtree,
        };

        let result = self
            .ldap
            .search(base, scope, filter, attrs.to_vec())
            .await
            .map_err(io_error)?;

        let (entries, status) = (result.0, result.1);
        if status.rc != 0 {
            return Err(TransportError::Rejected {
                code: status.rc,
                message: status.text,
            });
        }

        Ok(entries
            .into_iter()
            .map(|raw| {
                let entry = SearchEntry::construct(raw);
                DirectoryEntry {
                    dn: entry.dn,
                    attrs: entry.attrs,
                }
            })
            .collect())
    }

    async fn close(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            debug!(error = %e, "LDAP unbind failed during close");
        }
    }
}

fn io_error(e: LdapError) -> TransportError {
    TransportError::Io(e.to_string())
}
