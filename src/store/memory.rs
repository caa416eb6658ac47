use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::SessionStore;
use crate::error::{Result, UidlError};

/// A [`SessionStore`] keeping blobs in memory. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, Vec<u8>>>,
}

impl MemorySessionStore {
    /// an empty store
    pub fn new() -> Self {
        MemorySessionStore::default()
    }

    /// the number of stored sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// returns `true` when no session is stored
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, id: String, blob: Vec<u8>) -> Result<()> {
        debug!("storing {} bytes for session {}", blob.len(), id);
        self.sessions.insert(id, blob);
        Ok(())
    }

    fn load(&self, id: String) -> Result<Option<Vec<u8>>> {
        Ok(self.sessions.get(&id).map(|blob| blob.value().clone()))
    }

    fn remove(&self, id: String) -> Result<()> {
        match self.sessions.remove(&id) {
            Some(_) => Ok(()),
            None => Err(UidlError::Store(format!("session {} not found", id))),
        }
    }
}
