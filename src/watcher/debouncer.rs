//! Timer-driven debouncing of change notifications.
//!
//! Each key owns at most one pending timer. Scheduling a key that already has
//! a timer aborts the old one and restarts the window, so a burst of edits
//! produces a single delivery once the path has been quiet for the window.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::FileChangeType;

/// Identity of a debounced notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub uri: String,
    pub change: FileChangeType,
    pub subscriber: String,
}

#[derive(Debug)]
struct PendingTimer {
    generation: u64,
    handle: Option<AbortHandle>,
}

/// Concurrent table of pending timers.
///
/// Timers run on the shared [`TaskTracker`] so shutdown can wait for them,
/// and stop without delivering once `cancel` fires.
pub struct DebounceTable<K = DebounceKey> {
    window: Duration,
    pending: DashMap<K, PendingTimer>,
    generation: AtomicU64,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl<K> DebounceTable<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(window: Duration, tracker: TaskTracker, cancel: CancellationToken) -> Self {
        Self {
            window,
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
            tracker,
            cancel,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule `delivery` to run once `key` has been quiet for the window.
    ///
    /// Replaces any timer already pending for `key`. Must be called from
    /// within a tokio runtime.
    pub fn schedule<F>(self: &Arc<Self>, key: K, delivery: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let replaced = self.pending.insert(
            key.clone(),
            PendingTimer {
                generation,
                handle: None,
            },
        );
        if let Some(handle) = replaced.and_then(|timer| timer.handle) {
            handle.abort();
        }

        let table = Arc::clone(self);
        let timer_key = key.clone();
        let task = self.tracker.spawn(async move {
            tokio::select! {
                _ = table.cancel.cancelled() => return,
                _ = tokio::time::sleep(table.window) => {}
            }

            // A newer timer for the key owns delivery if ours was replaced
            let owned = table
                .pending
                .remove_if(&timer_key, |_, timer| timer.generation == generation)
                .is_some();
            if owned {
                delivery.await;
            }
        });

        if let Some(mut timer) = self.pending.get_mut(&key) {
            if timer.generation == generation {
                timer.handle = Some(task.abort_handle());
            }
        }
    }

    /// Drop the pending timer for `key` without delivering it.
    pub fn cancel(&self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some((_, timer)) => {
                if let Some(handle) = timer.handle {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
