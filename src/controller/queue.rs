//! De-duplicating work queue of instance keys.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

use crate::model::ObjectKey;

#[derive(Debug, Default)]
struct QueueState {
    /// Keys waiting for a worker, in arrival order.
    queue: VecDeque<ObjectKey>,
    /// Keys present in `queue`.
    queued: HashSet<ObjectKey>,
    /// Keys currently held by a worker.
    processing: HashSet<ObjectKey>,
    /// Keys added while being processed.
    dirty: HashSet<ObjectKey>,
    shutdown: bool,
}

/// Queue handing each instance key to at most one worker at a time.
///
/// A key added while it is queued is dropped as a duplicate. A key added
/// while a worker holds it is queued again once that worker calls
/// [`WorkQueue::done`].
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key.
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutdown {
            return;
        }

        if state.processing.contains(&key) {
            trace!("{key} is being processed, marking dirty");
            state.dirty.insert(key);
            return;
        }

        if state.queued.insert(key.clone()) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Adds a key once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Waits for the next key.
    ///
    /// Returns `None` once the queue has been shut down.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Releases a key handed out by [`WorkQueue::next`].
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);

        if state.dirty.remove(key) && !state.shutdown && state.queued.insert(key.clone()) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stops handing out keys and wakes every idle worker.
    pub async fn shutdown(&self) {
        self.state.lock().await.shutdown = true;
        self.notify.notify_waiters();
    }

    /// Returns true once [`WorkQueue::shutdown`] has been called.
    pub async fn is_shutdown(&self) -> bool {
        self.state.lock().await.shutdown
    }

    /// Returns the number of keys waiting for a worker.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Returns true if no key is waiting for a worker.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[tokio::test]
    async fn test_duplicates_collapse() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;
        queue.add(key("b")).await;
        queue.add(key("a")).await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.next().await, Some(key("a")));
        assert_eq!(queue.next().await, Some(key("b")));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_key_held_by_one_worker() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;

        let held = queue.next().await.unwrap();
        queue.add(key("a")).await;

        // Still held, so it must not be handed out again yet.
        assert!(queue.is_empty().await);

        queue.done(&held).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.next().await, Some(key("a")));
    }

    #[tokio::test]
    async fn test_done_without_readd() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;
        let held = queue.next().await.unwrap();
        queue.done(&held).await;

        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::task::yield_now().await;
        queue.shutdown().await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
        assert!(queue.is_shutdown().await);

        queue.add(key("a")).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_wakes_waiter() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::task::yield_now().await;
        queue.add(key("a")).await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Some(key("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after(key("a"), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(queue.is_empty().await);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.len().await, 1);
    }
}
