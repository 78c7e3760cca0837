//! Keyed work queue
//!
//! The dispatcher's queue holds namespaced pod keys with the classic
//! workqueue contract: a key is never queued twice concurrently, a key added
//! while being processed is requeued once processing finishes, and requeues
//! of a key that has not been forgotten are delayed exponentially so event
//! storms for a single pod cannot monopolize workers. Shutdown drains: queued
//! keys are still delivered, then every `get` returns `None`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

/// Delay before the first rate-limited requeue of a key
const REQUEUE_BASE: Duration = Duration::from_millis(5);

/// Upper bound on the per-key requeue delay
const REQUEUE_MAX: Duration = Duration::from_secs(30);

/// A keyed queue with dedup, per-key requeue rate limiting and drain shutdown
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    requeues: HashMap<String, u32>,
    draining: bool,
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        })
    }

    /// Enqueue a key.
    ///
    /// A key already waiting (or marked dirty while processing) is dropped;
    /// the pending dispatch covers it. Adds after shutdown are ignored.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let inserted = {
            let mut s = self.state.lock().unwrap();
            if s.draining || s.dirty.contains(&key) {
                false
            } else {
                s.dirty.insert(key.clone());
                if s.processing.contains(&key) {
                    // Requeued by done() once the in-flight dispatch finishes.
                    false
                } else {
                    s.queue.push_back(key);
                    true
                }
            }
        };
        if inserted {
            self.notify.notify_one();
        }
    }

    /// Pop the next key, waiting until one is available.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut s = self.state.lock().unwrap();
                if let Some(key) = s.queue.pop_front() {
                    s.dirty.remove(&key);
                    s.processing.insert(key.clone());
                    // Wake another waiter in case more keys are queued.
                    if !s.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if s.draining {
                    self.notify.notify_one();
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Acknowledge that processing of `key` finished.
    ///
    /// If the key went dirty while it was being processed it is requeued,
    /// after the per-key rate-limit delay.
    pub fn done(self: &Arc<Self>, key: &str) {
        let delay = {
            let mut s = self.state.lock().unwrap();
            s.processing.remove(key);
            if !s.dirty.contains(key) || s.draining {
                s.dirty.remove(key);
                return;
            }
            let attempts = s.requeues.entry(key.to_string()).or_insert(0);
            *attempts += 1;
            requeue_delay(*attempts)
        };

        debug!(key, delay_ms = delay.as_millis() as u64, "requeueing dirty key");
        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let inserted = {
                let mut s = queue.state.lock().unwrap();
                if s.draining || !s.dirty.contains(&key) {
                    false
                } else {
                    s.queue.push_back(key);
                    true
                }
            };
            if inserted {
                queue.notify.notify_one();
            }
        });
    }

    /// Reset the rate limiter for `key`.
    pub fn forget(&self, key: &str) {
        self.state.lock().unwrap().requeues.remove(key);
    }

    /// Stop accepting new keys and let queued work drain.
    pub fn shutdown_with_drain(&self) {
        {
            let mut s = self.state.lock().unwrap();
            s.draining = true;
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Number of keys waiting to be popped
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Whether no keys are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn requeue_delay(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    let delay = REQUEUE_BASE.saturating_mul(1u32 << exp);
    delay.min(REQUEUE_MAX)
}
