//! Bounded ingestion queue with configurable backpressure.
//!
//! [`BackpressureQueue`] is a multi-producer multi-consumer FIFO with a
//! fixed capacity and an explicit full-queue policy:
//!
//! - [`FullQueuePolicy::Wait`] — `enqueue` suspends the producer until
//!   space exists or its cancellation token fires.
//! - [`FullQueuePolicy::Drop`] — `enqueue` never suspends; a full queue
//!   yields `Ok(false)` and the caller accounts the item as dropped.
//!
//! Consumers call [`recv`](BackpressureQueue::recv) in a loop; after
//! [`complete`](BackpressureQueue::complete) the queue yields any remaining
//! buffered items and then `None`, so a drained consumer never blocks
//! forever. Items still buffered at shutdown are recovered with
//! [`drain`](BackpressureQueue::drain) for lost-update accounting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{QueueError, QueueResult};

/// Policy applied when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullQueuePolicy {
    /// Suspend the producer until space exists or cancellation fires.
    #[default]
    Wait,
    /// Reject the new item immediately; the caller counts it as dropped.
    Drop,
}

/// Bounded MPMC FIFO of pending updates.
///
/// Internally a `VecDeque` guarded by a mutex held only for push/pop, with
/// two semaphores tracking free slots and buffered items. No lock is held
/// across a suspension point.
pub struct BackpressureQueue<T> {
    buf: Mutex<VecDeque<T>>,
    /// Free slots; producers acquire, consumers release.
    space: Semaphore,
    /// Buffered items; producers release, consumers acquire.
    items: Semaphore,
    policy: FullQueuePolicy,
    closed: AtomicBool,
    capacity: usize,
}

impl<T> BackpressureQueue<T> {
    /// Creates a queue with the given fixed capacity and full-queue policy.
    pub fn new(capacity: usize, policy: FullQueuePolicy) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            space: Semaphore::new(capacity),
            items: Semaphore::new(0),
            policy,
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// The fixed capacity this queue was constructed with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    /// Returns `true` if no items are buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }

    /// Returns `true` once the queue has been completed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Offers an item to the queue.
    ///
    /// Returns `Ok(true)` when the item was accepted, `Ok(false)` when the
    /// `Drop` policy rejected it, `Err(QueueError::Cancelled)` when the
    /// token fired while waiting for space, and `Err(QueueError::Closed)`
    /// once the queue has been completed.
    pub async fn enqueue(&self, item: T, cancel: &CancellationToken) -> QueueResult<bool> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let permit = match self.policy {
            FullQueuePolicy::Drop => match self.space.try_acquire() {
                Ok(permit) => permit,
                Err(tokio::sync::TryAcquireError::NoPermits) => return Ok(false),
                Err(tokio::sync::TryAcquireError::Closed) => return Err(QueueError::Closed),
            },
            FullQueuePolicy::Wait => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                    acquired = self.space.acquire() => {
                        acquired.map_err(|_| QueueError::Closed)?
                    }
                }
            }
        };

        // The slot permit is consumed by the push and handed back to the
        // space semaphore when a consumer pops the item.
        permit.forget();
        self.buf.lock().push_back(item);
        self.items.add_permits(1);
        Ok(true)
    }

    /// Receives the next item in FIFO order.
    ///
    /// Suspends while the queue is empty and open. After [`complete`]
    /// (Self::complete) the remaining buffered items are yielded, then
    /// `Ok(None)` terminates the consumer loop.
    pub async fn recv(&self, cancel: &CancellationToken) -> QueueResult<Option<T>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            acquired = self.items.acquire() => match acquired {
                Ok(permit) => {
                    permit.forget();
                    let item = self
                        .buf
                        .lock()
                        .pop_front()
                        .expect("item permit without buffered item");
                    self.space.add_permits(1);
                    Ok(Some(item))
                }
                // Completed: drain whatever is left, then signal termination.
                Err(_) => Ok(self.buf.lock().pop_front()),
            },
        }
    }

    /// Closes the queue for writing.
    ///
    /// Suspended producers fail with [`QueueError::Closed`]; consumers keep
    /// receiving until the buffer is empty and then observe `None`.
    pub fn complete(&self) {
        self.closed.store(true, Ordering::Release);
        self.space.close();
        self.items.close();
    }

    /// Removes and returns every remaining buffered item.
    ///
    /// Used at shutdown to account items that never reached a worker.
    pub fn drain(&self) -> Vec<T> {
        self.buf.lock().drain(..).collect()
    }
}

impl<T> std::fmt::Debug for BackpressureQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BackpressureQueue::new(8, FullQueuePolicy::Wait);
        let cancel = CancellationToken::new();

        for i in 0..5 {
            assert!(queue.enqueue(i, &cancel).await.unwrap());
        }
        for i in 0..5 {
            assert_eq!(queue.recv(&cancel).await.unwrap(), Some(i));
        }
    }

    #[tokio::test]
    async fn test_drop_policy_rejects_when_full() {
        let queue = BackpressureQueue::new(2, FullQueuePolicy::Drop);
        let cancel = CancellationToken::new();

        assert!(queue.enqueue(1, &cancel).await.unwrap());
        assert!(queue.enqueue(2, &cancel).await.unwrap());
        assert!(!queue.enqueue(3, &cancel).await.unwrap());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_wait_policy_suspends_until_space() {
        let queue = Arc::new(BackpressureQueue::new(1, FullQueuePolicy::Wait));
        let cancel = CancellationToken::new();

        assert!(queue.enqueue(1, &cancel).await.unwrap());

        let producer = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.enqueue(2, &cancel).await })
        };

        // Give the producer a chance to park on the space semaphore.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.recv(&cancel).await.unwrap(), Some(1));
        assert!(producer.await.unwrap().unwrap());
        assert_eq!(queue.recv(&cancel).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_cancelled_enqueue_fails_with_cancellation() {
        let queue = Arc::new(BackpressureQueue::new(1, FullQueuePolicy::Wait));
        let cancel = CancellationToken::new();
        assert!(queue.enqueue(1, &cancel).await.unwrap());

        let producer = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.enqueue(2, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert_eq!(producer.await.unwrap(), Err(QueueError::Cancelled));
    }

    #[tokio::test]
    async fn test_complete_drains_then_terminates() {
        let queue = BackpressureQueue::new(4, FullQueuePolicy::Wait);
        let cancel = CancellationToken::new();

        queue.enqueue(1, &cancel).await.unwrap();
        queue.enqueue(2, &cancel).await.unwrap();
        queue.complete();

        assert_eq!(queue.enqueue(3, &cancel).await, Err(QueueError::Closed));
        assert_eq!(queue.recv(&cancel).await.unwrap(), Some(1));
        assert_eq!(queue.recv(&cancel).await.unwrap(), Some(2));
        assert_eq!(queue.recv(&cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_complete_wakes_parked_consumer() {
        let queue = Arc::new(BackpressureQueue::<u32>::new(4, FullQueuePolicy::Wait));
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.recv(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.complete();
        assert_eq!(consumer.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_producers_and_consumers() {
        let queue = Arc::new(BackpressureQueue::new(8, FullQueuePolicy::Wait));
        let cancel = CancellationToken::new();
        let total: usize = 200;

        let mut producers = Vec::new();
        for p in 0..4 {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..total / 4 {
                    queue.enqueue(p * 1000 + i, &cancel).await.unwrap();
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = 0usize;
                while let Some(_item) = queue.recv(&cancel).await.unwrap() {
                    seen += 1;
                }
                seen
            }));
        }

        for p in producers {
            p.await.unwrap();
        }
        queue.complete();

        let mut seen = 0usize;
        for c in consumers {
            seen += c.await.unwrap();
        }
        assert_eq!(seen, total);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drain_returns_residual_items() {
        let queue = BackpressureQueue::new(4, FullQueuePolicy::Wait);
        let cancel = CancellationToken::new();
        queue.enqueue(1, &cancel).await.unwrap();
        queue.enqueue(2, &cancel).await.unwrap();
        queue.complete();

        assert_eq!(queue.drain(), vec![1, 2]);
        assert!(queue.is_empty());
    }
}
