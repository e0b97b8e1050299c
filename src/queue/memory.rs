//! In-memory work queue

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::types::{Delivery, QueueError, WorkItem};
use super::JobQueue;

#[derive(Debug)]
struct Entry {
    id: i64,
    item: WorkItem,
    visible_at: Instant,
    receipt: Option<Uuid>,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct QueueInner {
    /// Ordered by `id`, which is assigned monotonically on enqueue
    entries: Vec<Entry>,
    next_id: i64,
}

/// Process-local queue with visibility timeouts
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, item: WorkItem, delay: Duration) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(Entry {
            id,
            item,
            visible_at: Instant::now() + delay,
            receipt: None,
            deliveries: 0,
        });
        Ok(())
    }

    async fn dequeue(&self, visibility: Duration) -> Result<Option<Delivery>, QueueError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let Some(entry) = inner.entries.iter_mut().find(|e| e.visible_at <= now) else {
            return Ok(None);
        };

        let receipt = Uuid::new_v4();
        entry.visible_at = now + visibility;
        entry.receipt = Some(receipt);
        entry.deliveries += 1;

        Ok(Some(Delivery {
            item: entry.item,
            entry_id: entry.id,
            receipt,
            deliveries: entry.deliveries,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|e| !(e.id == delivery.entry_id && e.receipt == Some(delivery.receipt)));

        if inner.entries.len() == before {
            tracing::debug!(entry_id = delivery.entry_id, "Ignoring ack with stale receipt");
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue_delay: Duration) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        match inner
            .entries
            .iter_mut()
            .find(|e| e.id == delivery.entry_id && e.receipt == Some(delivery.receipt))
        {
            Some(entry) => {
                entry.visible_at = Instant::now() + requeue_delay;
                entry.receipt = None;
            }
            None => {
                tracing::debug!(entry_id = delivery.entry_id, "Ignoring nack with stale receipt");
            }
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.inner.lock().entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Stage;

    fn item(stage: Stage) -> WorkItem {
        WorkItem::new(Uuid::new_v4(), stage)
    }

    const HIDE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InMemoryQueue::new();
        let first = item(Stage::Ocr);
        let second = item(Stage::Llm);
        queue.enqueue(first, Duration::ZERO).await.unwrap();
        queue.enqueue(second, Duration::ZERO).await.unwrap();

        assert_eq!(queue.dequeue(HIDE).await.unwrap().unwrap().item, first);
        assert_eq!(queue.dequeue(HIDE).await.unwrap().unwrap().item, second);
        assert!(queue.dequeue(HIDE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeued_item_is_invisible_until_ack() {
        let queue = InMemoryQueue::new();
        queue.enqueue(item(Stage::Ocr), Duration::ZERO).await.unwrap();

        let delivery = queue.dequeue(HIDE).await.unwrap().unwrap();
        assert!(queue.dequeue(HIDE).await.unwrap().is_none());
        assert_eq!(queue.len().await.unwrap(), 1);

        queue.ack(&delivery).await.unwrap();
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_redelivery_after_visibility_timeout() {
        let queue = InMemoryQueue::new();
        let work = item(Stage::Ocr);
        queue.enqueue(work, Duration::ZERO).await.unwrap();

        let first = queue.dequeue(Duration::from_millis(20)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let second = queue.dequeue(HIDE).await.unwrap().unwrap();
        assert_eq!(second.item, work);
        assert_eq!(second.deliveries, 2);
        assert_ne!(first.receipt, second.receipt);

        // The first worker's late ack must not drop the redelivered entry
        queue.ack(&first).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);

        queue.ack(&second).await.unwrap();
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_delayed_enqueue() {
        let queue = InMemoryQueue::new();
        queue.enqueue(item(Stage::Ocr), Duration::from_millis(30)).await.unwrap();

        assert!(queue.dequeue(HIDE).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.dequeue(HIDE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_nack_requeues_with_delay() {
        let queue = InMemoryQueue::new();
        queue.enqueue(item(Stage::Llm), Duration::ZERO).await.unwrap();

        let delivery = queue.dequeue(HIDE).await.unwrap().unwrap();
        queue.nack(&delivery, Duration::ZERO).await.unwrap();

        let again = queue.dequeue(HIDE).await.unwrap().unwrap();
        assert_eq!(again.item, delivery.item);
        assert_eq!(again.deliveries, 2);
    }
}
