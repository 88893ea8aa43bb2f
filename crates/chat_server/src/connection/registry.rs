//! The authoritative set of live sessions.
//!
//! Backed by a sharded concurrent map, so add/remove only lock one shard and
//! never the whole set. Iteration goes through [`Registry::snapshot`], which
//! copies the `Arc`s out and releases every shard before the caller does any
//! I/O with them.

use super::{Session, SessionId};
use crate::error::ServerError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Registry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session. Fails only if its id is already present.
    pub fn add(&self, session: Arc<Session>) -> Result<(), ServerError> {
        match self.sessions.entry(session.id()) {
            Entry::Occupied(_) => Err(ServerError::DuplicateSession(session.id())),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Removes a session if present. Removing an absent id is a no-op.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Current number of sessions. May be stale by the time it is used.
    pub fn size(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Point-in-time copy of the registered sessions.
    ///
    /// Concurrent adds and removes after this returns do not affect the
    /// returned list.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Invokes `visitor` once per session over a snapshot.
    pub fn snapshot_iterate(&self, mut visitor: impl FnMut(&Arc<Session>)) {
        for session in self.snapshot() {
            visitor(&session);
        }
    }

    /// Removes and returns every session.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}
