use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use pkg_constants::state::{REQUEUE_BASE_MS, REQUEUE_MAX_EXPONENT};

/// Deduplicating work queue with per-key serialization.
///
/// Semantics follow the client-go workqueue: a key is never handed to
/// two workers at once; adds for a key currently being processed are
/// parked in a dirty set and re-queued when the worker calls `done`;
/// adds for an already-queued key collapse into one. Failed keys are
/// re-queued with capped exponential backoff.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Default)]
struct Inner {
    order: VecDeque<String>,
    queued: HashSet<String>,
    active: HashSet<String>,
    dirty: HashSet<String>,
    failures: HashMap<String, u32>,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(WorkQueue {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        })
    }

    /// Enqueue a key. No-op if already queued; parked if in flight.
    pub async fn add(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        if inner.active.contains(key) {
            inner.dirty.insert(key.to_string());
            return;
        }
        if inner.queued.insert(key.to_string()) {
            inner.order.push_back(key.to_string());
            self.notify.notify_one();
        }
    }

    /// Wait for the next key and mark it in flight.
    pub async fn next(&self) -> String {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(key) = inner.order.pop_front() {
                    inner.queued.remove(&key);
                    inner.active.insert(key.clone());
                    if !inner.order.is_empty() {
                        // More work available, wake another worker.
                        self.notify.notify_one();
                    }
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark a key finished. Re-queues it if it went dirty while in
    /// flight.
    pub async fn done(&self, key: &str) {
        let redo = {
            let mut inner = self.inner.lock().await;
            inner.active.remove(key);
            inner.dirty.remove(key)
        };
        if redo {
            self.add(key).await;
        }
    }

    /// Reset a key's failure count after a successful reconcile.
    pub async fn forget(&self, key: &str) {
        self.inner.lock().await.failures.remove(key);
    }

    /// Schedule a failed key for retry with exponential backoff.
    pub async fn requeue(self: &Arc<Self>, key: &str) {
        let exponent = {
            let mut inner = self.inner.lock().await;
            let failures = inner.failures.entry(key.to_string()).or_insert(0);
            *failures += 1;
            (*failures - 1).min(REQUEUE_MAX_EXPONENT)
        };
        let delay = Duration::from_millis(REQUEUE_BASE_MS << exponent);

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key).await;
        });
    }

    /// Number of keys waiting (excludes in-flight keys).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
