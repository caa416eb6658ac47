use std::path::Path;

use sled::Db;
use tracing::{debug, info, instrument};

use super::SessionStore;
use crate::error::{Result, UidlError};

/// A [`SessionStore`] backed by a [`sled`] database. Every write is flushed before it
/// returns.
///
/// [`sled`]: https://docs.rs/sled/latest/sled/
#[derive(Debug, Clone)]
pub struct SledSessionStore {
    db: Db,
}

impl SledSessionStore {
    /// wraps an open database
    pub fn new(db: Db) -> Self {
        SledSessionStore { db }
    }

    /// opens (or creates) the database in `dir`
    #[instrument]
    pub fn open(dir: &Path) -> Result<Self> {
        info!("opening sled session store");
        Ok(SledSessionStore::new(sled::open(dir)?))
    }
}

impl SessionStore for SledSessionStore {
    fn save(&self, id: String, blob: Vec<u8>) -> Result<()> {
        debug!("storing {} bytes for session {}", blob.len(), id);
        self.db.insert(id.as_bytes(), blob)?;
        self.db.flush()?;
        Ok(())
    }

    fn load(&self, id: String) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(id.as_bytes())?.map(|blob| blob.to_vec()))
    }

    fn remove(&self, id: String) -> Result<()> {
        self.db
            .remove(id.as_bytes())?
            .ok_or_else(|| UidlError::Store(format!("session {} not found", id)))?;
        self.db.flush()?;
        Ok(())
    }
}
