//! Pending authentication requests awaiting their response.

use std::{collections::HashMap, time::Duration};

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::{error::ProtocolError, request::Binding};

/// An issued `AuthnRequest` that has not been answered yet.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Request id; the response must carry it as `InResponseTo`.
    pub id: String,
    /// Opaque value round-tripped through the IdP.
    pub relay_state: String,
    /// Local path to return to after login.
    pub return_to: String,
    /// Binding the response is expected on.
    pub response_binding: Binding,
    /// When the request was issued.
    pub created_at: Instant,
}

/// Table of pending requests keyed by request id.
///
/// Entries are removed on first lookup and ignored once older than the ttl,
/// so each response can be accepted at most once.
#[derive(Debug)]
pub struct RequestTracker {
    ttl: Duration,
    pending: RwLock<HashMap<String, PendingRequest>>,
}

impl RequestTracker {
    /// Creates an empty tracker.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Records a request. Expired entries are dropped on the way.
    pub fn track(
        &self,
        id: impl Into<String>,
        relay_state: impl Into<String>,
        return_to: impl Into<String>,
        response_binding: Binding,
    ) -> PendingRequest {
        let entry = PendingRequest {
            id: id.into(),
            relay_state: relay_state.into(),
            return_to: return_to.into(),
            response_binding,
            created_at: Instant::now(),
        };

        let mut pending = self.pending.write();
        pending.retain(|_, existing| existing.created_at.elapsed() < self.ttl);
        pending.insert(entry.id.clone(), entry.clone());
        entry
    }

    /// Removes and returns the entry for `id` if it is still fresh.
    pub fn consume(&self, id: &str) -> Result<PendingRequest, ProtocolError> {
        let entry = self.pending.write().remove(id);
        match entry {
            Some(entry) if entry.created_at.elapsed() < self.ttl => Ok(entry),
            Some(_) => {
                debug!(request_id = %id, "Pending request expired");
                Err(ProtocolError::UnmatchedResponse)
            },
            None => Err(ProtocolError::UnmatchedResponse),
        }
    }

    /// True if `id` is tracked and fresh.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending
            .read()
            .get(id)
            .is_some_and(|entry| entry.created_at.elapsed() < self.ttl)
    }

    /// Drops expired entries and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut pending = self.pending.write();
        let before = pending.len();
        pending.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        before - pending.len()
    }

    /// Number of tracked entries, expired ones included.
    pub fn len(&self) -> usize {
        self.pending.read().len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.pending.read().is_empty()
    }
}
