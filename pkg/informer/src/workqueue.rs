use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Deduplicating work queue guaranteeing at most one in-flight processing
/// task per key.
///
/// Invariants:
/// - every key in `pending` is also in `dirty` and not in `processing`;
/// - a key marked dirty while in `processing` is re-queued by `done`, so an
///   `add` during processing is never lost;
/// - repeated `add`s of a queued or in-flight key coalesce into a single
///   future delivery.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

struct QueueState {
    pending: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Mark `key` dirty. If it is already queued this is a no-op; if it is
    /// currently being processed it will be re-delivered after `done`.
    pub fn add(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        if state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            return;
        }
        state.pending.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Wait until a key is available, move it to the in-flight set and
    /// return it. Suspends the calling task while the queue is empty.
    pub async fn get(&self) -> String {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(key) = state.pending.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.pending.is_empty() {
                        // Wake the next waiter, if any
                        self.notify.notify_one();
                    }
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Release the in-flight slot for `key`; re-queue it if it was marked
    /// dirty while being processed.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.pending.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().pending.is_empty()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_fifo_delivery() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.get().await, "a");
        assert_eq!(queue.get().await, "b");
    }

    #[tokio::test]
    async fn test_pending_adds_dedup() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("a");
        queue.add("a");
        assert_eq!(queue.get().await, "a");
        queue.done("a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_add_during_processing_redelivers_after_done() {
        let queue = WorkQueue::new();
        queue.add("a");
        assert_eq!(queue.get().await, "a");

        // "a" is in flight: a new add must not deliver a second copy yet.
        queue.add("a");
        let blocked = timeout(Duration::from_millis(50), queue.get()).await;
        assert!(blocked.is_err());

        queue.done("a");
        assert_eq!(queue.get().await, "a");
    }

    #[tokio::test]
    async fn test_burst_during_processing_coalesces() {
        let queue = WorkQueue::new();
        queue.add("a");
        assert_eq!(queue.get().await, "a");
        queue.add("a");
        queue.add("a");
        queue.add("a");
        queue.done("a");
        assert_eq!(queue.get().await, "a");
        queue.done("a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_wakes_blocked_waiter() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        // Give the waiter a chance to block first
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.add("a");
        let key = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(key, "a");
    }
}
