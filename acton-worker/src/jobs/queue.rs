//! Bounded FIFO hand-off between producers and the scheduler.

use super::{JobId, JobQueueError, WorkItem};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Job processing metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    /// Total jobs enqueued.
    pub jobs_enqueued: u64,
    /// Total jobs dequeued.
    pub jobs_dequeued: u64,
    /// Total jobs completed successfully.
    pub jobs_completed: u64,
    /// Total jobs failed, panicked, or rejected at session binding.
    pub jobs_failed: u64,
    /// Total jobs dropped from the queue at shutdown.
    pub jobs_dropped: u64,
    /// Current queue size.
    pub current_queue_size: usize,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Producer side of the job queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<WorkItem>,
    counters: Arc<Counters>,
}

/// Consumer side of the job queue, owned by the scheduler.
#[derive(Debug)]
pub struct JobReceiver {
    receiver: mpsc::Receiver<WorkItem>,
    counters: Arc<Counters>,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` pending items.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::InvalidCapacity`] if `capacity` is zero.
    pub fn bounded(capacity: usize) -> Result<(Self, JobReceiver), JobQueueError> {
        if capacity == 0 || capacity > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(JobQueueError::InvalidCapacity(capacity));
        }

        let (sender, receiver) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());
        Ok((
            Self {
                sender,
                counters: counters.clone(),
            },
            JobReceiver { receiver, counters },
        ))
    }

    /// Append an item, waiting for room while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Closed`] if the scheduler has stopped.
    pub async fn enqueue(&self, item: WorkItem) -> Result<JobId, JobQueueError> {
        let id = item.id();
        self.sender
            .send(item)
            .await
            .map_err(|_| JobQueueError::Closed)?;
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(job_id = %id, "Job enqueued");
        Ok(id)
    }

    /// Maximum number of pending items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Number of items waiting to be dequeued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Whether no item is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the consumer side has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Snapshot of the queue counters.
    #[must_use]
    pub fn metrics(&self) -> JobMetrics {
        self.counters.snapshot(self.len())
    }
}

impl JobReceiver {
    /// Wait for the next item.
    ///
    /// Returns `None` once `cancel` fires or every producer is gone.
    /// Cancellation wins over a ready item.
    pub async fn dequeue(&mut self, cancel: &CancellationToken) -> Option<WorkItem> {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            item = self.receiver.recv() => item,
        };

        if item.is_some() {
            self.counters.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Close the queue and take every item still in it.
    ///
    /// Producers waiting for room are woken with [`JobQueueError::Closed`].
    pub fn drain(&mut self) -> Vec<WorkItem> {
        self.receiver.close();

        let mut remaining = Vec::new();
        while let Ok(item) = self.receiver.try_recv() {
            remaining.push(item);
        }

        let dropped = u64::try_from(remaining.len()).unwrap_or(u64::MAX);
        self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
        remaining
    }

    pub(crate) fn record_completed(&self) {
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the queue counters.
    #[must_use]
    pub fn metrics(&self) -> JobMetrics {
        self.counters.snapshot(self.receiver.len())
    }
}

impl Counters {
    fn snapshot(&self, current_queue_size: usize) -> JobMetrics {
        JobMetrics {
            jobs_enqueued: self.enqueued.load(Ordering::Relaxed),
            jobs_dequeued: self.dequeued.load(Ordering::Relaxed),
            jobs_completed: self.completed.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            jobs_dropped: self.dropped.load(Ordering::Relaxed),
            current_queue_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job_fn;
    use std::time::Duration;

    fn item(name: &str) -> WorkItem {
        WorkItem::new(job_fn(name, |_scope, _cancel| async { Ok(()) }), None)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            JobQueue::bounded(0).unwrap_err(),
            JobQueueError::InvalidCapacity(0)
        );
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut receiver) = JobQueue::bounded(8).unwrap();
        let cancel = CancellationToken::new();

        for name in ["a", "b", "c"] {
            queue.enqueue(item(name)).await.unwrap();
        }
        assert_eq!(queue.len(), 3);

        for expected in ["a", "b", "c"] {
            let next = receiver.dequeue(&cancel).await.unwrap();
            assert_eq!(next.name(), expected);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let (queue, mut receiver) = JobQueue::bounded(1).unwrap();
        let cancel = CancellationToken::new();
        queue.enqueue(item("first")).await.unwrap();

        let producer = queue.clone();
        let blocked = tokio::spawn(async move { producer.enqueue(item("second")).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(receiver.dequeue(&cancel).await.unwrap().name(), "first");
        blocked.await.unwrap().unwrap();
        assert_eq!(receiver.dequeue(&cancel).await.unwrap().name(), "second");
    }

    #[tokio::test]
    async fn test_cancel_wins_over_ready_item() {
        let (queue, mut receiver) = JobQueue::bounded(4).unwrap();
        queue.enqueue(item("pending")).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(receiver.dequeue(&cancel).await.is_none());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_closes_queue() {
        let (queue, mut receiver) = JobQueue::bounded(4).unwrap();
        queue.enqueue(item("left-behind")).await.unwrap();

        let drained = receiver.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(
            queue.enqueue(item("late")).await.unwrap_err(),
            JobQueueError::Closed
        );

        let metrics = queue.metrics();
        assert_eq!(metrics.jobs_enqueued, 1);
        assert_eq!(metrics.jobs_dropped, 1);
        assert_eq!(metrics.jobs_dequeued, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_producers_lose_nothing() {
        let (queue, mut receiver) = JobQueue::bounded(4).unwrap();
        let cancel = CancellationToken::new();

        let mut producers = Vec::new();
        for p in 0..8 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..25 {
                    queue.enqueue(item(&format!("{p}-{i}"))).await.unwrap();
                }
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let next = receiver.dequeue(&cancel).await.unwrap();
            assert!(seen.insert(next.id()));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        assert_eq!(receiver.metrics().jobs_dequeued, 200);
    }

    #[tokio::test]
    async fn test_metrics_serialize_as_flat_json() {
        let (queue, _receiver) = JobQueue::bounded(4).unwrap();
        queue.enqueue(item("one")).await.unwrap();

        let json = serde_json::to_value(queue.metrics()).unwrap();
        assert_eq!(json["jobs_enqueued"], 1);
        assert_eq!(json["current_queue_size"], 1);

        let back: JobMetrics = serde_json::from_value(json).unwrap();
        assert_eq!(back, queue.metrics());
    }
}
