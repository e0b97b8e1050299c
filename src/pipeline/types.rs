//! Pipeline types

use std::time::Duration;

use crate::document::{DocumentId, PipelineState, Stage};
use crate::error::StoreError;
use crate::queue::QueueError;

/// Errors surfaced by orchestrator operations.
///
/// Stage failures never show up here; they are recorded on the document.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid source reference: {0}")]
    Validation(String),

    #[error("Document not found: {0}")]
    NotFound(DocumentId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// What a single `process_next` call did
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Nothing visible in the queue
    Idle,
    /// A stage finished and the next one was scheduled
    Advanced {
        id: DocumentId,
        from: PipelineState,
        to: PipelineState,
    },
    /// A retryable failure; the item comes back after `delay`
    Retrying {
        id: DocumentId,
        stage: Stage,
        attempt: u32,
        delay: Duration,
    },
    /// Another worker holds a live claim on the stage; the item comes back after `delay`
    Deferred {
        id: DocumentId,
        stage: Stage,
        delay: Duration,
    },
    /// The document ended in `failed`
    Failed {
        id: DocumentId,
        stage: Stage,
        error: String,
    },
    /// The document ended in `complete`
    Completed { id: DocumentId },
    /// The delivery was dropped without running anything
    Discarded { id: DocumentId, reason: String },
}
