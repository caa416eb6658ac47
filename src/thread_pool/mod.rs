//! Thread pools running the connections of the TCP front end.
//!
//! [`SharedQueueThreadPool`] feeds a fixed set of threads from a crossbeam channel and
//! replaces threads whose job panicked. [`RayonThreadPool`] hands jobs to a rayon pool.
use crate::Result;

pub use self::rayon_pool::RayonThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;

mod rayon_pool;
mod shared_queue;

/// A pool of threads that runs jobs.
pub trait ThreadPool {
    /// creates a pool running `threads` threads
    ///
    /// # Errors
    /// returns an error when the threads can not be started
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// Runs `job` on one of the threads of the pool.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}
