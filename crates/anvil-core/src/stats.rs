//! Concurrent counters and per-handler latency tracking.
//!
//! [`StatsCollector`] is one of only two structures shared across all
//! workers (the queue is the other). Counters are atomics; the per-handler
//! sample buffers sit behind a short-lived mutex. A [`StatsSnapshot`] is a
//! serializable point-in-time aggregation for external consumers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Maximum latency samples retained per handler.
const MAX_SAMPLES: usize = 512;

/// Reason an update was dropped before reaching a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Duplicate update id within the dedup window.
    Dedup,
    /// The bounded queue was full under the `Drop` policy.
    QueueFull,
}

#[derive(Debug, Default)]
struct HandlerStats {
    requests: u64,
    errors: u64,
    samples: Vec<Duration>,
    first_seen: Option<Instant>,
}

impl HandlerStats {
    fn record(&mut self, elapsed: Duration, errored: bool) {
        self.requests += 1;
        if errored {
            self.errors += 1;
        }
        if self.first_seen.is_none() {
            self.first_seen = Some(Instant::now());
        }
        if self.samples.len() == MAX_SAMPLES {
            self.samples.remove(0);
        }
        self.samples.push(elapsed);
    }
}

#[derive(Debug, Default)]
struct Shared {
    dropped_dedup: AtomicU64,
    dropped_queue: AtomicU64,
    rate_limited: AtomicU64,
    lost: AtomicU64,
    queue_depth: AtomicUsize,
    handlers: Mutex<HashMap<String, HandlerStats>>,
}

/// Thread-safe statistics collector shared by every pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct StatsCollector {
    shared: Arc<Shared>,
}

impl StatsCollector {
    /// Creates a collector with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an update dropped before dispatch.
    pub fn record_dropped(&self, reason: DropReason) {
        match reason {
            DropReason::Dedup => self.shared.dropped_dedup.fetch_add(1, Ordering::Relaxed),
            DropReason::QueueFull => self.shared.dropped_queue.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Counts a rate-limited update.
    pub fn record_rate_limited(&self) {
        self.shared.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts updates lost at shutdown. Called exactly once per drain.
    pub fn record_lost(&self, count: u64) {
        self.shared.lost.fetch_add(count, Ordering::Relaxed);
    }

    /// Publishes the current queue depth.
    pub fn set_queue_depth(&self, depth: usize) {
        self.shared.queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Updates lost so far.
    pub fn lost(&self) -> u64 {
        self.shared.lost.load(Ordering::Relaxed)
    }

    /// Starts a latency measurement for the named handler.
    pub fn begin(&self, handler: &str) -> Measurement {
        Measurement {
            shared: Arc::clone(&self.shared),
            handler: handler.to_string(),
            start: Instant::now(),
        }
    }

    /// Produces a point-in-time snapshot of every counter and histogram.
    pub fn snapshot(&self) -> StatsSnapshot {
        let dropped_dedup = self.shared.dropped_dedup.load(Ordering::Relaxed);
        let dropped_queue = self.shared.dropped_queue.load(Ordering::Relaxed);

        let handlers = self
            .shared
            .handlers
            .lock()
            .iter()
            .map(|(name, stats)| (name.clone(), HandlerSnapshot::from_stats(stats)))
            .collect();

        StatsSnapshot {
            handlers,
            dropped_dedup,
            dropped_queue,
            dropped_updates: dropped_dedup + dropped_queue,
            rate_limited: self.shared.rate_limited.load(Ordering::Relaxed),
            lost_updates: self.shared.lost.load(Ordering::Relaxed),
            queue_depth: self.shared.queue_depth.load(Ordering::Relaxed),
        }
    }
}

/// In-flight latency measurement for one handler invocation.
///
/// Finalize with [`complete`](Self::complete) or [`error`](Self::error);
/// an abandoned measurement records nothing.
#[must_use = "finalize with complete() or error()"]
pub struct Measurement {
    shared: Arc<Shared>,
    handler: String,
    start: Instant,
}

impl Measurement {
    /// Records a successful invocation with its elapsed time.
    pub fn complete(self) {
        self.finish(false);
    }

    /// Records a failed invocation with its elapsed time.
    pub fn error(self) {
        self.finish(true);
    }

    fn finish(self, errored: bool) {
        let elapsed = self.start.elapsed();
        self.shared
            .handlers
            .lock()
            .entry(self.handler)
            .or_default()
            .record(elapsed, errored);
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Read-only aggregation of all counters at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Per-handler latency and error figures.
    pub handlers: HashMap<String, HandlerSnapshot>,
    /// Total updates dropped before dispatch (dedup + full queue).
    pub dropped_updates: u64,
    /// Updates suppressed as duplicates.
    pub dropped_dedup: u64,
    /// Updates rejected by the full queue under the `Drop` policy.
    pub dropped_queue: u64,
    /// Updates blocked by the rate limiter.
    pub rate_limited: u64,
    /// Updates still queued when the drain timeout expired.
    pub lost_updates: u64,
    /// Queue depth at snapshot time.
    pub queue_depth: usize,
}

/// Latency and error figures for one handler.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerSnapshot {
    /// Total invocations.
    pub requests: u64,
    /// Failed invocations.
    pub errors: u64,
    /// `errors / requests`, zero when no requests.
    pub error_rate: f64,
    /// Requests per second since the handler was first invoked.
    pub requests_per_sec: f64,
    /// Median latency in milliseconds.
    pub p50_ms: f64,
    /// 95th percentile latency in milliseconds.
    pub p95_ms: f64,
    /// 99th percentile latency in milliseconds.
    pub p99_ms: f64,
}

impl HandlerSnapshot {
    fn from_stats(stats: &HandlerStats) -> Self {
        let mut sorted = stats.samples.clone();
        sorted.sort_unstable();

        let error_rate = if stats.requests == 0 {
            0.0
        } else {
            stats.errors as f64 / stats.requests as f64
        };
        let requests_per_sec = stats
            .first_seen
            .map(|t| {
                let secs = t.elapsed().as_secs_f64();
                if secs > 0.0 {
                    stats.requests as f64 / secs
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);

        Self {
            requests: stats.requests,
            errors: stats.errors,
            error_rate,
            requests_per_sec,
            p50_ms: percentile_ms(&sorted, 0.50),
            p95_ms: percentile_ms(&sorted, 0.95),
            p99_ms: percentile_ms(&sorted, 0.99),
        }
    }
}

/// Nearest-rank percentile over a sorted sample slice, in milliseconds.
fn percentile_ms(sorted: &[Duration], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[rank].as_secs_f64() * 1000.0
}
