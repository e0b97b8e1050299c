//! Durable work queue stored in SQLite

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::types::{Delivery, QueueError, WorkItem};
use super::JobQueue;

#[derive(Debug, sqlx::FromRow)]
struct ClaimedRow {
    seq: i64,
    document_id: String,
    stage: String,
    deliveries: i64,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

/// Queue backed by the `work_items` table
#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    /// The pool must have the schema from [`crate::db::initialize_schema`]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for SqliteQueue {
    async fn enqueue(&self, item: WorkItem, delay: Duration) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO work_items (document_id, stage, visible_at, enqueued_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(item.document_id.to_string())
        .bind(item.stage.as_str())
        .bind(now_millis() + millis(delay))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn dequeue(&self, visibility: Duration) -> Result<Option<Delivery>, QueueError> {
        let now = now_millis();
        let receipt = Uuid::new_v4();

        // Single statement, so two workers can never claim the same entry
        let row = sqlx::query_as::<_, ClaimedRow>(
            r#"
            UPDATE work_items
            SET visible_at = ?, receipt = ?, deliveries = deliveries + 1
            WHERE seq = (
                SELECT seq FROM work_items
                WHERE visible_at <= ?
                ORDER BY seq ASC
                LIMIT 1
            )
            RETURNING seq, document_id, stage, deliveries
            "#,
        )
        .bind(now + millis(visibility))
        .bind(receipt.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let document_id = Uuid::parse_str(&row.document_id)
            .map_err(|e| QueueError::Corrupt(format!("entry {}: {}", row.seq, e)))?;
        let stage = row
            .stage
            .parse()
            .map_err(|e| QueueError::Corrupt(format!("entry {}: {}", row.seq, e)))?;

        Ok(Some(Delivery {
            item: WorkItem::new(document_id, stage),
            entry_id: row.seq,
            receipt,
            deliveries: row.deliveries as u32,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM work_items WHERE seq = ? AND receipt = ?")
            .bind(delivery.entry_id)
            .bind(delivery.receipt.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(entry_id = delivery.entry_id, "Ignoring ack with stale receipt");
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue_delay: Duration) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET visible_at = ?, receipt = NULL
            WHERE seq = ? AND receipt = ?
            "#,
        )
        .bind(now_millis() + millis(requeue_delay))
        .bind(delivery.entry_id)
        .bind(delivery.receipt.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(entry_id = delivery.entry_id, "Ignoring nack with stale receipt");
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM work_items")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0 as usize)
    }
}
