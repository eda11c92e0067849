//! Unbounded in-process FIFO of queued LLM work.
//!
//! The queue supports:
//!
//! - Non-blocking enqueue (no capacity limit)
//! - Timed dequeue so workers stay responsive to shutdown
//! - Tail re-enqueue for throttled entries
//! - Closing, after which new submissions are refused
//!
//! Entries still queued when the queue is closed stay where they are; their
//! handles resolve as abandoned once the queue itself is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::entry::QueuedTask;

/// Shared FIFO of boxed task entries.
#[derive(Default)]
pub struct WorkQueue {
    entries: Mutex<VecDeque<Box<dyn QueuedTask>>>,
    available: Notify,
    closed: AtomicBool,
}

impl WorkQueue {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a new entry at the tail.
    ///
    /// # Errors
    ///
    /// Hands the entry back if the queue has been closed.
    pub fn push(&self, entry: Box<dyn QueuedTask>) -> Result<(), Box<dyn QueuedTask>> {
        if self.is_closed() {
            return Err(entry);
        }
        self.lock().push_back(entry);
        self.available.notify_one();
        Ok(())
    }

    /// Returns an already-dequeued entry to the tail.
    ///
    /// Accepted even after close: the entry was admitted before shutdown and
    /// must not be lost.
    pub fn requeue(&self, entry: Box<dyn QueuedTask>) {
        self.lock().push_back(entry);
        self.available.notify_one();
    }

    /// Dequeues the next entry, waiting up to `timeout` for one to arrive.
    ///
    /// # Returns
    ///
    /// - `Some(entry)` if an entry was dequeued
    /// - `None` if the timeout expired with the queue still empty
    pub async fn poll(&self, timeout: Duration) -> Option<Box<dyn QueuedTask>> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.available.notified();

            if let Some(entry) = self.try_pop() {
                return Some(entry);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Dequeues the head entry without waiting.
    pub fn try_pop(&self) -> Option<Box<dyn QueuedTask>> {
        self.lock().pop_front()
    }

    /// Returns the number of entries waiting to be processed.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuses further submissions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.available.notify_waiters();
    }

    /// Returns whether the queue refuses new submissions.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Box<dyn QueuedTask>>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
