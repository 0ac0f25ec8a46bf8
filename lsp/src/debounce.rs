//! Per-document debouncing of change events.
//!
//! Each document has at most one pending timer. Scheduling again for the
//! same document replaces the payload and restarts the window; only the last
//! payload is delivered. Documents never affect each other's timers.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Timers<K> {
    next_generation: u64,
    pending: HashMap<K, Pending>,
}

/// Delays a handler until no new event for the same key arrived within the
/// window.
///
/// Must be used from within a tokio runtime. Timers are tokio tasks; firing
/// or cancelling releases them.
pub struct ChangeDebouncer<K, P> {
    window: Duration,
    handler: Arc<dyn Fn(K, P) + Send + Sync>,
    timers: Arc<Mutex<Timers<K>>>,
}

impl<K, P> ChangeDebouncer<K, P>
where
    K: Eq + Hash + Clone + Send + 'static,
    P: Send + 'static,
{
    pub fn new(window: Duration, handler: impl Fn(K, P) + Send + Sync + 'static) -> Self {
        Self {
            window,
            handler: Arc::new(handler),
            timers: Arc::new(Mutex::new(Timers {
                next_generation: 0,
                pending: HashMap::new(),
            })),
        }
    }

    /// Start (or restart) the window for `key`, replacing any pending payload.
    pub fn schedule(&self, key: K, payload: P) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let window = self.window;
        let handler = Arc::clone(&self.handler);
        let shared = Arc::clone(&self.timers);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            {
                let mut timers = shared.lock().unwrap_or_else(PoisonError::into_inner);
                // A newer schedule may have replaced us between wake-up and lock.
                match timers.pending.get(&task_key) {
                    Some(pending) if pending.generation == generation => {
                        timers.pending.remove(&task_key);
                    }
                    _ => return,
                }
            }
            handler(task_key, payload);
        });

        if let Some(previous) = timers.pending.insert(key, Pending { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Drop the pending timer for `key`, if any.
    pub fn cancel(&self, key: &K) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        match timers.pending.remove(key) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every pending timer. Nothing scheduled so far will fire.
    pub fn cancel_all(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, pending) in timers.pending.drain() {
            pending.handle.abort();
        }
    }

    /// Number of keys with a timer in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }
}

impl<K, P> Drop for ChangeDebouncer<K, P> {
    fn drop(&mut self) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, pending) in timers.pending.drain() {
            pending.handle.abort();
        }
    }
}
