//! Bounded, keyed task pool
//!
//! At most one task per key is queued or running; scheduling a key that is
//! already in flight is a no-op. Concurrency is bounded by a semaphore.

use std::collections::HashSet;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

struct Shared<K> {
    inflight: Mutex<HashSet<K>>,
    idle: Notify,
}

impl<K> Shared<K> {
    fn inflight(&self) -> MutexGuard<'_, HashSet<K>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases a key when its task ends, including by panic
struct KeyGuard<K: Eq + Hash> {
    shared: Arc<Shared<K>>,
    key: Option<K>,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut inflight = self.shared.inflight();
            inflight.remove(&key);
            if inflight.is_empty() {
                self.shared.idle.notify_waiters();
            }
        }
    }
}

/// Worker pool with per-key de-duplication
pub struct TaskPool<K> {
    name: &'static str,
    permits: Arc<Semaphore>,
    shared: Arc<Shared<K>>,
}

impl<K> TaskPool<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    /// Create a pool running at most `workers` tasks at once
    pub fn new(name: &'static str, workers: usize) -> Self {
        Self {
            name,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            shared: Arc::new(Shared {
                inflight: Mutex::new(HashSet::new()),
                idle: Notify::new(),
            }),
        }
    }

    /// Queue `task` under `key`
    ///
    /// Returns `false` (and drops the task) when the key is already queued
    /// or running.
    pub fn schedule<F>(&self, key: K, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.shared.inflight().insert(key.clone()) {
            debug!(pool = self.name, ?key, "Task already in flight, dropped");
            return false;
        }
        debug!(pool = self.name, ?key, "Task queued");

        let guard = KeyGuard {
            shared: self.shared.clone(),
            key: Some(key),
        };
        let permits = self.permits.clone();
        let name = self.name;

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(pool = name, "Pool closed, task dropped");
                    return;
                }
            };
            task.await;
        });

        true
    }

    /// Whether `key` is queued or running
    pub fn is_scheduled(&self, key: &K) -> bool {
        self.shared.inflight().contains(key)
    }

    /// Number of queued or running tasks
    pub fn len(&self) -> usize {
        self.shared.inflight().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until no task is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
