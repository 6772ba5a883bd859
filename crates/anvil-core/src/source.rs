//! Update source contract and the push handle given to sources.
//!
//! The concrete ingestion mechanism (long poll, webhook) lives outside the
//! engine. A source receives an [`UpdateSink`] and pushes one
//! [`UpdateContext`] per inbound event; the sink applies the queue's
//! full-queue policy and keeps the live depth stat current.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{QueueResult, SourceError};
use crate::queue::BackpressureQueue;
use crate::stats::{DropReason, StatsCollector};
use crate::update::UpdateContext;

/// External producer of inbound updates.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Starts producing updates into `sink` until [`stop`](Self::stop) is
    /// called or `cancel` fires. Must push each inbound event exactly once.
    async fn start(&self, sink: UpdateSink, cancel: CancellationToken) -> Result<(), SourceError>;

    /// Stops the source from producing further updates.
    async fn stop(&self) -> Result<(), SourceError>;
}

/// Push handle bridging a source to the bounded queue.
///
/// Cloneable; every accepted or rejected push updates the shared stats.
#[derive(Clone)]
pub struct UpdateSink {
    queue: Arc<BackpressureQueue<UpdateContext>>,
    stats: StatsCollector,
    cancel: CancellationToken,
}

impl UpdateSink {
    /// Creates a sink over the orchestrator's queue and stats.
    pub fn new(
        queue: Arc<BackpressureQueue<UpdateContext>>,
        stats: StatsCollector,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            stats,
            cancel,
        }
    }

    /// Offers one inbound update to the engine.
    ///
    /// Attaches the orchestrator-lifetime cancellation token to the update,
    /// applies the queue's full-queue policy, and accounts `Drop`-policy
    /// rejections as dropped updates. Returns whether the update was
    /// accepted.
    pub async fn push(&self, update: UpdateContext) -> QueueResult<bool> {
        let update = update.with_cancellation(self.cancel.clone());
        let update_id = update.update_id().to_string();

        let accepted = self.queue.enqueue(update, &self.cancel).await?;
        if !accepted {
            debug!(update_id = %update_id, "queue full, dropping update");
            self.stats.record_dropped(DropReason::QueueFull);
        }
        self.stats.set_queue_depth(self.queue.len());
        Ok(accepted)
    }
}

impl std::fmt::Debug for UpdateSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateSink")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FullQueuePolicy;
    use crate::update::{ChatRef, UserRef};

    fn update(id: &str) -> UpdateContext {
        UpdateContext::new("test", id, ChatRef(1), UserRef(1))
    }

    #[tokio::test]
    async fn test_push_attaches_lifetime_token() {
        let queue = Arc::new(BackpressureQueue::new(4, FullQueuePolicy::Wait));
        let cancel = CancellationToken::new();
        let sink = UpdateSink::new(Arc::clone(&queue), StatsCollector::new(), cancel.clone());

        sink.push(update("1")).await.unwrap();
        let received = queue.recv(&cancel).await.unwrap().unwrap();

        cancel.cancel();
        assert!(received.is_cancelled());
    }

    #[tokio::test]
    async fn test_rejected_push_counts_as_dropped() {
        let queue = Arc::new(BackpressureQueue::new(1, FullQueuePolicy::Drop));
        let stats = StatsCollector::new();
        let sink = UpdateSink::new(queue, stats.clone(), CancellationToken::new());

        assert!(sink.push(update("1")).await.unwrap());
        assert!(!sink.push(update("2")).await.unwrap());

        let snap = stats.snapshot();
        assert_eq!(snap.dropped_queue, 1);
        assert_eq!(snap.queue_depth, 1);
    }
}
