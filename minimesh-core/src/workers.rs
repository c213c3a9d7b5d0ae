//! Fixed-size worker thread pool
//!
//! N threads drain a bounded channel and run every task through a shared
//! handler. Pushing blocks once the queue is full, which is the rate limit
//! on background deliveries. Dropping the pool closes the channel and joins
//! the workers.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

/// Fixed pool of worker threads fed by a bounded queue.
pub struct WorkerPool<T> {
    sender: Option<flume::Sender<T>>,
    threads: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `threads` workers draining a queue of `capacity` tasks.
    ///
    /// Worker thread spawn failure is fatal: there is no degraded mode
    /// without background delivery.
    #[must_use]
    pub fn new<F>(name: &str, threads: usize, capacity: usize, handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (sender, receiver) = flume::bounded(capacity);
        let handler = Arc::new(handler);
        let threads = (0..threads.max(1))
            .map(|index| {
                let receiver = receiver.clone();
                let handler = Arc::clone(&handler);
                thread::Builder::new()
                    .name(format!("{name}-{index}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            handler(task);
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            sender: Some(sender),
            threads,
        }
    }

    /// Enqueue a task, blocking while the queue is full.
    pub fn push(&self, task: T) {
        if let Some(sender) = &self.sender {
            // Send only fails once the pool is shutting down; tasks are
            // retried by their callers, so dropping one here is safe.
            let _ = sender.send(task);
        }
    }

    /// Number of tasks waiting in the queue.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.sender.as_ref().map_or(0, flume::Sender::len)
    }

    /// A handle for feeding the queue from outside the pool, `None` once
    /// the pool is shutting down.
    ///
    /// Cloned handles keep the queue alive: holders must drop them before
    /// the pool is dropped, or the join in `Drop` waits forever.
    #[must_use]
    pub fn sender(&self) -> Option<flume::Sender<T>> {
        self.sender.clone()
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_owned();
            if handle.join().is_err() {
                debug!(%name, "worker thread panicked");
            }
        }
    }
}
