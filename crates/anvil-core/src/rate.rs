//! Sliding-window rate limiting primitives.
//!
//! [`RateWindow`] is a fixed-capacity ring of event timestamps for one key;
//! [`RateWindowStore`] maps keys to rings and owns the periodic sweep that
//! evicts rings whose newest event predates the window, bounding memory
//! under key churn.
//!
//! The ring answers "may this key act again now?" precisely for the local
//! instance. Cross-instance consistency is the distributed rate-limit
//! mode's job (a fixed-window counter on the state backend), not this
//! module's.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Fixed-capacity ring of recent-event timestamps for one key.
///
/// The ring never holds more than `limit` timestamps. An action is allowed
/// when the ring is not yet full, or when the oldest recorded timestamp is
/// older than the window.
#[derive(Debug)]
pub struct RateWindow {
    slots: Vec<Instant>,
    /// Index of the oldest slot once the ring is full.
    cursor: usize,
}

impl RateWindow {
    /// Creates an empty ring admitting at most `limit` events per window.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "rate window limit must be non-zero");
        Self {
            slots: Vec::with_capacity(limit),
            cursor: 0,
        }
    }

    /// Checks whether an event at `now` is allowed and records it if so.
    ///
    /// Check and record are a single step; the caller holds the per-map
    /// lock for the duration, so two racing updates for the same key can
    /// never both slip under the limit.
    pub fn try_acquire(&mut self, now: Instant, window: Duration) -> bool {
        if self.slots.len() < self.slots.capacity() {
            self.slots.push(now);
            return true;
        }

        let oldest = self.slots[self.cursor];
        if now.duration_since(oldest) >= window {
            self.slots[self.cursor] = now;
            self.cursor = (self.cursor + 1) % self.slots.len();
            true
        } else {
            false
        }
    }

    /// Timestamp of the most recently recorded event.
    pub fn newest(&self) -> Option<Instant> {
        if self.slots.is_empty() {
            return None;
        }
        if self.slots.len() < self.slots.capacity() {
            self.slots.last().copied()
        } else {
            let idx = (self.cursor + self.slots.len() - 1) % self.slots.len();
            Some(self.slots[idx])
        }
    }

    /// Number of timestamps currently recorded.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Per-key ring storage with periodic idle eviction.
///
/// One store exists per rate-limited scope (user, chat). The sweep task is
/// owned by the store and stops when the store is dropped.
pub struct RateWindowStore<K> {
    windows: Arc<Mutex<HashMap<K, RateWindow>>>,
    limit: usize,
    window: Duration,
    sweeper: CancellationToken,
}

impl<K> RateWindowStore<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates a store admitting `limit` events per `window` per key and
    /// starts its sweep task.
    pub fn new(limit: usize, window: Duration) -> Self {
        let windows: Arc<Mutex<HashMap<K, RateWindow>>> = Arc::new(Mutex::new(HashMap::new()));
        let sweeper = CancellationToken::new();

        let sweep_windows = Arc::clone(&windows);
        let sweep_stop = sweeper.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window.max(Duration::from_millis(50)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = sweep_stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let mut map = sweep_windows.lock();
                        let before = map.len();
                        map.retain(|_, ring| {
                            ring.newest()
                                .is_some_and(|newest| now.duration_since(newest) < window)
                        });
                        let removed = before - map.len();
                        if removed > 0 {
                            trace!(removed, remaining = map.len(), "evicted idle rate windows");
                        }
                    }
                }
            }
        });

        Self {
            windows,
            limit,
            window,
            sweeper,
        }
    }

    /// Checks and records an event for `key` at the current instant.
    pub fn try_acquire(&self, key: K) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    /// Checks and records an event for `key` at an explicit instant.
    pub fn try_acquire_at(&self, key: K, now: Instant) -> bool {
        let mut map = self.windows.lock();
        map.entry(key)
            .or_insert_with(|| RateWindow::new(self.limit))
            .try_acquire(now, self.window)
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

impl<K> Drop for RateWindowStore<K> {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

impl<K> std::fmt::Debug for RateWindowStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateWindowStore")
            .field("tracked_keys", &self.windows.lock().len())
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_allows_up_to_limit() {
        let mut ring = RateWindow::new(3);
        let now = Instant::now();
        assert!(ring.try_acquire(now, WINDOW));
        assert!(ring.try_acquire(now, WINDOW));
        assert!(ring.try_acquire(now, WINDOW));
        assert!(!ring.try_acquire(now, WINDOW));
    }

    #[test]
    fn test_allows_again_after_window() {
        let mut ring = RateWindow::new(2);
        let start = Instant::now();
        assert!(ring.try_acquire(start, WINDOW));
        assert!(ring.try_acquire(start + Duration::from_secs(30), WINDOW));
        assert!(!ring.try_acquire(start + Duration::from_secs(45), WINDOW));
        // The oldest entry has aged out; exactly one new slot opens.
        assert!(ring.try_acquire(start + WINDOW, WINDOW));
        assert!(!ring.try_acquire(start + WINDOW, WINDOW));
    }

    #[test]
    fn test_ring_never_exceeds_limit() {
        let mut ring = RateWindow::new(4);
        let start = Instant::now();
        for i in 0..32 {
            ring.try_acquire(start + Duration::from_secs(i * 60), WINDOW);
            assert!(ring.len() <= 4);
        }
    }

    #[test]
    fn test_newest_tracks_latest_event() {
        let mut ring = RateWindow::new(2);
        let start = Instant::now();
        assert_eq!(ring.newest(), None);
        ring.try_acquire(start, WINDOW);
        ring.try_acquire(start + Duration::from_secs(1), WINDOW);
        assert_eq!(ring.newest(), Some(start + Duration::from_secs(1)));
        ring.try_acquire(start + WINDOW + Duration::from_secs(2), WINDOW);
        assert_eq!(ring.newest(), Some(start + WINDOW + Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_store_isolates_keys() {
        let store = RateWindowStore::new(1, WINDOW);
        assert!(store.try_acquire(1u64));
        assert!(!store.try_acquire(1u64));
        assert!(store.try_acquire(2u64));
    }

    #[tokio::test]
    async fn test_store_sweeps_idle_keys() {
        let store = RateWindowStore::new(1, Duration::from_millis(40));
        assert!(store.try_acquire(1u64));
        assert_eq!(store.tracked_keys(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.tracked_keys(), 0);
    }
}
