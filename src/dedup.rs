//! Pod UID deduplication
//!
//! Once a pod UID has been dispatched, re-notifications for the same pod are
//! no-ops until the entry expires. The set is injected into the workers (not
//! process-global) so tests supply a fresh one and drive the clock; a future
//! multi-replica deployment swaps it for a shared cache behind the same two
//! calls.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// How long a processed UID blocks re-processing
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Thread-safe set of recently processed keys with time-based expiry
pub struct TtlSet {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl TtlSet {
    /// Create a set with the default 30-minute TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a set with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `key` was added within the TTL.
    ///
    /// Expired entries are swept on every call, spreading cleanup cost over
    /// reads and keeping memory proportional to the keys seen in one TTL
    /// window.
    pub fn has(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, added| now.duration_since(*added) <= self.ttl);
        entries.contains_key(key)
    }

    /// Mark `key` as processed now.
    pub fn add(&self, key: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), Instant::now());
    }

    /// Number of live entries (expired entries may still be counted until the
    /// next sweep)
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the set holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TtlSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn add_then_has() {
        let set = TtlSet::new();
        assert!(!set.has("uid-1"));
        set.add("uid-1");
        assert!(set.has("uid-1"));
        assert!(!set.has("uid-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let set = TtlSet::with_ttl(Duration::from_secs(60));
        set.add("uid-1");

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(set.has("uid-1"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!set.has("uid-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_bounds_memory() {
        let set = TtlSet::with_ttl(Duration::from_secs(60));
        for i in 0..100 {
            set.add(&format!("uid-{i}"));
        }
        assert_eq!(set.len(), 100);

        tokio::time::advance(Duration::from_secs(61)).await;
        // Any read sweeps the whole expired generation.
        assert!(!set.has("uid-0"));
        assert!(set.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn re_add_refreshes_the_clock() {
        let set = TtlSet::with_ttl(Duration::from_secs(60));
        set.add("uid-1");
        tokio::time::advance(Duration::from_secs(45)).await;
        set.add("uid-1");
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(set.has("uid-1"));
    }
}
