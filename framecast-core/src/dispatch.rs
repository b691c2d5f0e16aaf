//! Single-threaded FIFO dispatch queue
//!
//! A dedicated thread owns a piece of state exclusively and runs posted
//! tasks against it one at a time, in the order they were posted. Anything
//! that touches pool state goes through here, so the state itself needs no
//! locks.

use std::sync::mpsc;
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, error, trace};

use crate::error::{CaptureError, Result};

type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Message<S> {
    Run(Task<S>),
    Shutdown,
}

/// Owner of the dispatch thread
pub struct DispatchQueue<S> {
    tx: mpsc::Sender<Message<S>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
    name: String,
}

/// Cloneable poster for callbacks that must not own the queue
pub struct DispatchHandle<S> {
    tx: mpsc::Sender<Message<S>>,
}

impl<S> Clone for DispatchHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> DispatchHandle<S> {
    /// Post a task; returns `false` once the queue has shut down
    pub fn post(&self, task: impl FnOnce(&mut S) + Send + 'static) -> bool {
        self.tx.send(Message::Run(Box::new(task))).is_ok()
    }
}

impl<S: Send + 'static> DispatchQueue<S> {
    /// Spawn the dispatch thread, moving `state` onto it
    pub fn spawn(name: impl Into<String>, state: S) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Message<S>>();

        let thread_name = name.clone();
        let worker = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut state = state;
                debug!("Dispatch queue '{}' started", thread_name);
                while let Ok(message) = rx.recv() {
                    match message {
                        Message::Run(task) => task(&mut state),
                        Message::Shutdown => break,
                    }
                }
                debug!("Dispatch queue '{}' stopped", thread_name);
            })
            .map_err(|e| {
                CaptureError::dispatch(format!("Failed to spawn dispatch thread: {}", e))
            })?;

        Ok(Self {
            tx,
            worker_id: worker.thread().id(),
            worker: Some(worker),
            name,
        })
    }

    /// Queue name (also the thread name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a poster that can be moved into callbacks
    pub fn handle(&self) -> DispatchHandle<S> {
        DispatchHandle {
            tx: self.tx.clone(),
        }
    }

    /// Post a task; returns `false` once the queue has shut down
    pub fn post(&self, task: impl FnOnce(&mut S) + Send + 'static) -> bool {
        self.tx.send(Message::Run(Box::new(task))).is_ok()
    }

    /// Run a task on the queue and wait for its result
    ///
    /// Tasks posted earlier run first. Calling this from the dispatch
    /// thread itself would deadlock and is rejected.
    pub fn sync<R: Send + 'static>(
        &self,
        task: impl FnOnce(&mut S) -> R + Send + 'static,
    ) -> Result<R> {
        if self.is_worker_thread() {
            return Err(CaptureError::dispatch(format!(
                "re-entrant sync on '{}'",
                self.name
            )));
        }

        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let posted = self.post(move |state| {
            let _ = result_tx.send(task(state));
        });
        if !posted {
            return Err(CaptureError::dispatch(format!("'{}' has shut down", self.name)));
        }

        result_rx.recv().map_err(|_| {
            error!("Dispatch queue '{}' dropped a sync task", self.name);
            CaptureError::dispatch(format!("'{}' dropped the task", self.name))
        })
    }

    /// Whether the calling thread is the dispatch thread
    pub fn is_worker_thread(&self) -> bool {
        std::thread::current().id() == self.worker_id
    }

    /// Run everything already posted, then stop the thread
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = self.tx.send(Message::Shutdown);
        if worker.thread().id() == std::thread::current().id() {
            // Dropped from inside a task; the loop exits on its own.
            trace!("Dispatch queue '{}' shut down from its own thread", self.name);
            return;
        }
        if worker.join().is_err() {
            error!("Dispatch queue '{}' panicked", self.name);
        }
    }
}

impl<S> Drop for DispatchQueue<S> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.tx.send(Message::Shutdown);
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tasks_run_in_order() {
        let queue = DispatchQueue::spawn("test-order", Vec::new()).unwrap();
        for i in 0..10 {
            queue.post(move |v: &mut Vec<i32>| v.push(i));
        }
        let seen = queue.sync(|v| v.clone()).unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_handle_posts_from_other_threads() {
        let queue = DispatchQueue::spawn("test-handle", 0usize).unwrap();
        let handle = queue.handle();
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        handle.post(|n| *n += 1);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(queue.sync(|n| *n).unwrap(), 100);
    }

    #[test]
    fn test_reentrant_sync_is_rejected() {
        let queue = Arc::new(DispatchQueue::spawn("test-reentrant", ()).unwrap());
        let inner = queue.clone();
        let result = queue.sync(move |_| inner.sync(|_| ()).is_err()).unwrap();
        assert!(result);
    }

    #[test]
    fn test_post_after_shutdown_fails() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut queue = DispatchQueue::spawn("test-shutdown", ()).unwrap();
        let handle = queue.handle();

        let c = counter.clone();
        queue.post(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        queue.shutdown();

        // Pending work drained before the thread stopped
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!handle.post(|_| {}));
        assert!(queue.sync(|_| ()).is_err());
    }
}
