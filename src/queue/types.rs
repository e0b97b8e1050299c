//! Work queue types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{DocumentId, Stage};

/// A request to run one stage for one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub document_id: DocumentId,
    pub stage: Stage,
}

impl WorkItem {
    pub fn new(document_id: DocumentId, stage: Stage) -> Self {
        Self { document_id, stage }
    }
}

/// One hand-out of a queued item to a worker.
///
/// `receipt` is fresh for every delivery; ack/nack only take effect while it is
/// still the current receipt of the entry, so a worker whose visibility window
/// expired cannot remove the copy handed to someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub item: WorkItem,
    /// Queue-internal entry id
    pub entry_id: i64,
    pub receipt: Uuid,
    /// How many times this entry has been handed out, including this one
    pub deliveries: u32,
}

/// Queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt queue entry: {0}")]
    Corrupt(String),

    #[error("Unsupported queue URL: {0}")]
    UnsupportedUrl(String),
}
