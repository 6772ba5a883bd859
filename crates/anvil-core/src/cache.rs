//! Process-local TTL set used by the dedup middleware when no distributed
//! state backend is configured.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Lower bound for the background sweep interval.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// A set whose members expire after a fixed TTL.
///
/// [`try_add`](Self::try_add) is the only mutation: it atomically inserts a
/// key if it is absent or already expired. A background task owned by the
/// cache sweeps expired entries to bound memory; the sweep stops when the
/// cache is dropped.
pub struct TtlCache<K> {
    entries: Arc<Mutex<HashMap<K, Instant>>>,
    ttl: Duration,
    sweeper: CancellationToken,
}

impl<K> TtlCache<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates a cache with the given TTL and starts its sweep task.
    ///
    /// The sweep runs every `ttl / 2` (floored at 50ms); a sweep finding
    /// nothing to remove is not an error.
    pub fn new(ttl: Duration) -> Self {
        let entries: Arc<Mutex<HashMap<K, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
        let sweeper = CancellationToken::new();

        let sweep_entries = Arc::clone(&entries);
        let sweep_stop = sweeper.clone();
        let interval = (ttl / 2).max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = sweep_stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let mut map = sweep_entries.lock();
                        let before = map.len();
                        map.retain(|_, expiry| *expiry > now);
                        let removed = before - map.len();
                        if removed > 0 {
                            trace!(removed, remaining = map.len(), "swept expired ttl entries");
                        }
                    }
                }
            }
        });

        Self {
            entries,
            ttl,
            sweeper,
        }
    }

    /// Atomically inserts `key` if it is absent or expired.
    ///
    /// Returns `true` when the insertion happened (first sighting within
    /// the window) and `false` when a live entry already exists.
    pub fn try_add(&self, key: K) -> bool {
        let now = Instant::now();
        let mut map = self.entries.lock();
        match map.get(&key) {
            Some(expiry) if *expiry > now => false,
            _ => {
                map.insert(key, now + self.ttl);
                true
            }
        }
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K> Drop for TtlCache<K> {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

impl<K> std::fmt::Debug for TtlCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.entries.lock().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_within_ttl_rejected() {
        let cache = TtlCache::new(Duration::from_millis(200));
        assert!(cache.try_add("42"));
        assert!(!cache.try_add("42"));
    }

    #[tokio::test]
    async fn test_expired_key_reinserted() {
        let cache = TtlCache::new(Duration::from_millis(50));
        assert!(cache.try_add("42"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.try_add("42"));
    }

    #[tokio::test]
    async fn test_sweep_bounds_memory() {
        let cache = TtlCache::new(Duration::from_millis(40));
        for i in 0..100 {
            assert!(cache.try_add(i));
        }
        // TTL (40ms) + sweep interval floor (50ms) with slack.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_independent() {
        let cache = TtlCache::new(Duration::from_secs(60));
        assert!(cache.try_add("a"));
        assert!(cache.try_add("b"));
        assert!(!cache.try_add("a"));
    }
}
