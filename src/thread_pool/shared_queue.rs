use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error, instrument};

use crate::thread_pool::ThreadPool;
use crate::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A thread pool implemented with a shared job queue.
///
/// The pool is the single producer of a crossbeam MPMC [`channel`], its threads are the
/// consumers. A thread whose job panics is replaced by a new one, so a panicking request
/// handler does not shrink the pool. When the OS refuses to start a replacement the pool
/// shrinks, and a pool without threads drops the jobs it is given.
///
/// [`channel`]: https://docs.rs/crossbeam/0.8.1/crossbeam/channel/index.html
pub struct SharedQueueThreadPool {
    tx: Sender<Job>,
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(threads: u32) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<Job>();
        for i in 0..threads {
            let task_rx = TaskReceiver(rx.clone());
            thread::Builder::new()
                .name(format!("uidl-worker-{}", i))
                .spawn(move || run_tasks(task_rx))?;
        }
        debug!("created shared queue thread pool with {} threads", threads);
        Ok(SharedQueueThreadPool { tx })
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            error!("there are no threads left in the pool, the job was dropped");
        }
    }
}

/// Receives jobs from the channel and runs them. Dropping it while the thread panics
/// starts a replacement thread.
#[derive(Clone, Debug)]
struct TaskReceiver(Receiver<Job>);

impl Drop for TaskReceiver {
    #[instrument]
    fn drop(&mut self) {
        if thread::panicking() {
            debug!("worker panicked, starting a new thread");
            let task_rx = self.clone();
            if let Err(e) = thread::Builder::new().spawn(move || run_tasks(task_rx)) {
                error!("failed to spawn a thread: {}", e);
            }
        }
    }
}

#[instrument]
fn run_tasks(rx: TaskReceiver) {
    while let Ok(job) = rx.0.recv() {
        debug!("received a new job");
        job();
    }
    debug!("thread exited because the thread pool was destroyed");
}
