//! Job Queue
//!
//! Hands work items to pipeline workers with at-least-once delivery.
//!
//! A dequeued entry stays in the queue but is invisible to other workers for a
//! visibility window. It disappears on `ack`, comes back after a delay on
//! `nack`, and comes back on its own if the worker never answers (crashed or
//! stuck). Duplicate deliveries are expected; the document store's
//! compare-and-swap makes them harmless.
//!
//! Two implementations:
//! - [`InMemoryQueue`]: process-local, lost on restart
//! - [`SqliteQueue`]: durable, shares the document database

mod memory;
mod sqlite;
mod types;

pub use memory::InMemoryQueue;
pub use sqlite::SqliteQueue;
pub use types::{Delivery, QueueError, WorkItem};

use std::time::Duration;

use async_trait::async_trait;

/// Work queue contract
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add an item that becomes visible after `delay`
    async fn enqueue(&self, item: WorkItem, delay: Duration) -> Result<(), QueueError>;

    /// Take the oldest visible item, hiding it for `visibility`
    async fn dequeue(&self, visibility: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Remove a delivered item for good
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Give a delivered item back, visible again after `requeue_delay`
    async fn nack(&self, delivery: &Delivery, requeue_delay: Duration) -> Result<(), QueueError>;

    /// Number of entries, visible or not
    async fn len(&self) -> Result<usize, QueueError>;

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}
