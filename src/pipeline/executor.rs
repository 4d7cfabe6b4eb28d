//! Fixed-size worker pool with joinable task handles.
//!
//! Tasks run on a dedicated rayon pool. Each submission gets a one-shot
//! channel; joining blocks until the task delivers a value or is known to
//! never deliver one (cancelled before it started, returned `None`, or
//! panicked). After [`WorkerPool::shutdown`] queued tasks are skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, warn};

/// Resolve a requested thread count.
///
/// `0` uses all available CPUs, a negative value that many fewer (at least
/// one), and a positive value is taken as is.
pub fn resolve_thread_count(requested: isize) -> usize {
    if requested > 0 {
        return requested as usize;
    }
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1) as isize;
    (available + requested).max(1) as usize
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    cancelled: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Create a pool; see [`resolve_thread_count`] for `num_threads`.
    pub fn new(num_threads: isize) -> anyhow::Result<Self> {
        let n = resolve_thread_count(num_threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("constellation-worker-{}", i + 1))
            .panic_handler(|_| warn!("Worker task panicked"))
            .build()
            .context("building worker pool")?;
        debug!("Started worker pool with {} threads", n);
        Ok(Self {
            pool,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue `task`; its result is delivered through the returned handle.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Option<T> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let cancelled = Arc::clone(&self.cancelled);
        self.pool.spawn(move || {
            if cancelled.load(Ordering::Acquire) {
                debug!("Skipping task queued before shutdown");
                return;
            }
            // The receiver may already be gone; nobody is waiting then.
            let _ = tx.send(task());
        });
        TaskHandle { rx }
    }

    /// Stop running queued tasks. Tasks already running finish normally.
    pub fn shutdown(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a submitted task.
pub struct TaskHandle<T> {
    rx: Receiver<Option<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes. `None` when it produced no value.
    pub fn join(self) -> Option<T> {
        self.rx.recv().ok().flatten()
    }
}

/// A value that is either already available or still being computed.
pub enum Pending<T> {
    Ready(T),
    Running(TaskHandle<T>),
}

impl<T> Pending<T> {
    pub fn join(self) -> Option<T> {
        match self {
            Pending::Ready(v) => Some(v),
            Pending::Running(handle) => handle.join(),
        }
    }
}
