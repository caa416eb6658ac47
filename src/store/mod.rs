//! Persistence of the [`WrappedSession`](crate::transport::WrappedSession) blobs of sessions.
//!
//! Two backends are provided: [`MemorySessionStore`], which keeps the blobs in a concurrent
//! map, and [`SledSessionStore`], which writes them to a [`sled`] database so sessions
//! survive a restart of the server.
//!
//! [`sled`]: https://docs.rs/sled/latest/sled/
use crate::Result;

/// A trait for storing opaque session blobs by session id.
pub trait SessionStore: Clone + Send + 'static {
    /// stores the blob of session `id`
    ///
    /// If the session was already stored, its previous blob is overwritten.
    fn save(&self, id: String, blob: Vec<u8>) -> Result<()>;

    /// Gets the blob stored for session `id`
    ///
    /// Returns `None` if no blob is stored for the session.
    fn load(&self, id: String) -> Result<Option<Vec<u8>>>;

    /// Removes the blob of session `id`
    ///
    /// # Errors
    ///
    /// Returns `UidlError::Store` if no blob is stored for the session.
    fn remove(&self, id: String) -> Result<()>;
}

mod memory;
mod sled;

pub use self::memory::MemorySessionStore;
pub use self::sled::SledSessionStore;
