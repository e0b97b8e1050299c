//! Pipeline orchestrator
//!
//! Drives documents through `queued → ocr → llm → persist → complete`, one
//! queue delivery at a time. Every state change goes through the store's
//! compare-and-swap, so duplicate or late deliveries lose the race instead of
//! corrupting the document. Entering a stage also takes a lease as long as the
//! queue's visibility timeout; a duplicate delivery that finds the lease alive
//! is put back instead of running the provider a second time.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use super::retry::RetryPolicy;
use super::stage::{StageHandler, StageResult};
use super::types::{Outcome, PipelineError};
use crate::config::Config;
use crate::db::DocumentStore;
use crate::document::{Document, DocumentId, PipelineState, Stage, StatePatch, Transition};
use crate::error::StoreError;
use crate::queue::{Delivery, JobQueue, WorkItem};

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub ocr_retry: RetryPolicy,
    pub llm_retry: RetryPolicy,
    /// How long a delivery stays hidden from other workers
    pub visibility: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ocr_retry: config.pipeline.ocr_retry.clone(),
            llm_retry: config.pipeline.llm_retry.clone(),
            visibility: config.queue.visibility_timeout,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            ocr_retry: RetryPolicy::default(),
            llm_retry: RetryPolicy::default(),
            visibility: Duration::from_secs(900),
        }
    }
}

/// Shortest wait before a deferred delivery is looked at again
const MIN_DEFER: Duration = Duration::from_millis(100);

/// What to do with a delivery given the document's current state
enum Plan {
    Run,
    Forward,
    Discard(String),
}

pub struct Orchestrator {
    store: Arc<dyn DocumentStore>,
    queue: Arc<dyn JobQueue>,
    ocr: Arc<dyn StageHandler>,
    llm: Arc<dyn StageHandler>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        queue: Arc<dyn JobQueue>,
        ocr: Arc<dyn StageHandler>,
        llm: Arc<dyn StageHandler>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            queue,
            ocr,
            llm,
            settings,
        }
    }

    // ========================================================================
    // Submission and queries
    // ========================================================================

    /// Register a paper and schedule its OCR stage
    pub async fn enqueue(&self, source_ref: &str) -> Result<DocumentId, PipelineError> {
        let source_ref = validate_source(source_ref).await?;

        let document = self.store.create(&source_ref).await?;
        self.queue
            .enqueue(WorkItem::new(document.id, Stage::Ocr), Duration::ZERO)
            .await?;

        tracing::info!(document_id = %document.id, source_ref = %source_ref, "Document queued");

        Ok(document.id)
    }

    pub async fn get_status(&self, id: DocumentId) -> Result<Document, PipelineError> {
        self.store
            .get(id)
            .await?
            .ok_or(PipelineError::NotFound(id))
    }

    /// Administrative cancel: move a live document to `failed`
    pub async fn cancel(&self, id: DocumentId, reason: &str) -> Result<Document, PipelineError> {
        match self.store.cancel(id, reason).await {
            Ok(document) => Ok(document),
            Err(StoreError::NotFound(id)) => Err(PipelineError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn history(&self, id: DocumentId) -> Result<Vec<Transition>, PipelineError> {
        self.get_status(id).await?;
        Ok(self.store.history(id).await?)
    }

    /// Reschedule every unfinished document. Returns how many were queued.
    pub async fn resume_pending(&self) -> Result<usize, PipelineError> {
        let documents = self.store.list_unfinished().await?;
        let mut resumed = 0;

        for document in &documents {
            let Some(stage) = pending_stage(document.state) else {
                continue;
            };
            self.queue
                .enqueue(WorkItem::new(document.id, stage), Duration::ZERO)
                .await?;
            resumed += 1;
        }

        if resumed > 0 {
            tracing::info!(count = resumed, "Resumed unfinished documents");
        }

        Ok(resumed)
    }

    // ========================================================================
    // State machine step
    // ========================================================================

    /// Take one delivery from the queue and advance its document by one step.
    ///
    /// Returns `Err` only when the store or queue itself failed; the delivery
    /// is then left unacknowledged and will be handed out again.
    pub async fn process_next(&self) -> Result<Outcome, PipelineError> {
        let Some(delivery) = self.queue.dequeue(self.settings.visibility).await? else {
            return Ok(Outcome::Idle);
        };

        let item = delivery.item;
        let span = tracing::debug_span!(
            "step",
            document_id = %item.document_id,
            stage = %item.stage,
            delivery = delivery.deliveries
        );

        self.step(&delivery).instrument(span).await
    }

    async fn step(&self, delivery: &Delivery) -> Result<Outcome, PipelineError> {
        let item = delivery.item;
        let Some(document) = self.store.get(item.document_id).await? else {
            return self.discard(delivery, "unknown document").await;
        };

        match plan(item.stage, document.state) {
            Plan::Discard(reason) => self.discard(delivery, &reason).await,
            Plan::Forward => {
                if let Some(next) = item.stage.next() {
                    self.queue
                        .enqueue(WorkItem::new(document.id, next), Duration::ZERO)
                        .await?;
                }
                self.discard(delivery, "stage already done, next stage scheduled")
                    .await
            }
            Plan::Run => match item.stage {
                Stage::Persist => self.persist(delivery, document).await,
                Stage::Ocr => self.run_stage(delivery, document, self.ocr.as_ref()).await,
                Stage::Llm => self.run_stage(delivery, document, self.llm.as_ref()).await,
            },
        }
    }

    async fn run_stage(
        &self,
        delivery: &Delivery,
        document: Document,
        handler: &dyn StageHandler,
    ) -> Result<Outcome, PipelineError> {
        let stage = delivery.item.stage;
        let in_progress = stage.in_progress_state();

        let document = match self
            .store
            .claim(document.id, document.state, in_progress, self.settings.visibility)
            .await
        {
            Ok(document) => document,
            Err(StoreError::Claimed { remaining, .. }) => {
                return self.defer(delivery, remaining.max(MIN_DEFER)).await;
            }
            Err(StoreError::Conflict { actual, .. }) => {
                return self
                    .discard(delivery, &format!("lost claim, document is {}", actual))
                    .await;
            }
            Err(StoreError::NotFound(_)) => return self.discard(delivery, "unknown document").await,
            Err(e) => return Err(e.into()),
        };

        match handler.run(&document).await {
            StageResult::Success(payload) => self.succeed(delivery, &document, payload).await,
            StageResult::Retryable(error) => self.retry(delivery, &document, error).await,
            StageResult::Fatal(error) => self.fail(delivery, &document, error).await,
        }
    }

    async fn succeed(
        &self,
        delivery: &Delivery,
        document: &Document,
        payload: String,
    ) -> Result<Outcome, PipelineError> {
        let stage = delivery.item.stage;
        let patch = match stage {
            Stage::Ocr => StatePatch::extracted(payload),
            _ => StatePatch::analysed(payload),
        };

        let done = stage.done_state();
        if let Some(outcome) = self
            .transition(delivery, document.state, done, patch)
            .await?
        {
            return Ok(outcome);
        }

        // A cancel may land between the CAS and here
        let current = self.get_status(document.id).await?;
        if current.state != done {
            return self
                .discard(delivery, &format!("document became {} before scheduling", current.state))
                .await;
        }

        if let Some(next) = stage.next() {
            self.queue
                .enqueue(WorkItem::new(document.id, next), Duration::ZERO)
                .await?;
        }
        self.queue.ack(delivery).await?;

        tracing::info!(from = %document.state, to = %done, "Stage complete");

        Ok(Outcome::Advanced {
            id: document.id,
            from: document.state,
            to: done,
        })
    }

    async fn retry(
        &self,
        delivery: &Delivery,
        document: &Document,
        error: String,
    ) -> Result<Outcome, PipelineError> {
        let stage = delivery.item.stage;
        let policy = self.policy(stage);
        let attempt = document.attempts(stage) + 1;

        let failed_state = match stage.failed_state() {
            Some(state) if policy.allows_retry(attempt) => state,
            _ => {
                tracing::warn!(attempt, error = %error, "Retries exhausted");
                let error = format!("{} (gave up after {} attempts)", error, attempt);
                return self.fail(delivery, document, error).await;
            }
        };

        let patch = StatePatch::failed_attempt(stage, &error);
        if let Some(outcome) = self
            .transition(delivery, document.state, failed_state, patch)
            .await?
        {
            return Ok(outcome);
        }

        let delay = policy.delay_for(attempt);
        self.queue.nack(delivery, delay).await?;

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Stage failed, retrying"
        );

        Ok(Outcome::Retrying {
            id: document.id,
            stage,
            attempt,
            delay,
        })
    }

    async fn fail(
        &self,
        delivery: &Delivery,
        document: &Document,
        error: String,
    ) -> Result<Outcome, PipelineError> {
        let stage = delivery.item.stage;
        let patch = StatePatch::failed_attempt(stage, &error);

        if let Some(outcome) = self
            .transition(delivery, document.state, PipelineState::Failed, patch)
            .await?
        {
            return Ok(outcome);
        }
        self.queue.ack(delivery).await?;

        tracing::error!(error = %error, "Document failed");

        Ok(Outcome::Failed {
            id: document.id,
            stage,
            error,
        })
    }

    /// Record the analysis, then close the document
    async fn persist(&self, delivery: &Delivery, document: Document) -> Result<Outcome, PipelineError> {
        if document.state == PipelineState::LlmDone {
            if let Some(outcome) = self
                .transition(delivery, PipelineState::LlmDone, PipelineState::Persisted, StatePatch::default())
                .await?
            {
                return Ok(outcome);
            }
        }

        if let Some(outcome) = self
            .transition(delivery, PipelineState::Persisted, PipelineState::Complete, StatePatch::default())
            .await?
        {
            return Ok(outcome);
        }
        self.queue.ack(delivery).await?;

        tracing::info!("Document complete");

        Ok(Outcome::Completed { id: document.id })
    }

    /// CAS the document; on conflict drop the delivery and return the outcome
    async fn transition(
        &self,
        delivery: &Delivery,
        expected: PipelineState,
        new: PipelineState,
        patch: StatePatch,
    ) -> Result<Option<Outcome>, PipelineError> {
        match self
            .store
            .update_state(delivery.item.document_id, expected, new, patch)
            .await
        {
            Ok(_) => Ok(None),
            Err(StoreError::Conflict { actual, .. }) => {
                let reason = format!("document moved to {} while {} was running", actual, delivery.item.stage);
                Ok(Some(self.discard(delivery, &reason).await?))
            }
            Err(StoreError::NotFound(_)) => Ok(Some(self.discard(delivery, "unknown document").await?)),
            Err(e) => Err(e.into()),
        }
    }

    /// Put the delivery back untouched; another worker owns the stage
    async fn defer(&self, delivery: &Delivery, delay: Duration) -> Result<Outcome, PipelineError> {
        self.queue.nack(delivery, delay).await?;
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Stage claimed elsewhere, delivery deferred");

        Ok(Outcome::Deferred {
            id: delivery.item.document_id,
            stage: delivery.item.stage,
            delay,
        })
    }

    async fn discard(&self, delivery: &Delivery, reason: &str) -> Result<Outcome, PipelineError> {
        self.queue.ack(delivery).await?;
        tracing::debug!(reason = %reason, "Delivery discarded");

        Ok(Outcome::Discarded {
            id: delivery.item.document_id,
            reason: reason.to_string(),
        })
    }

    fn policy(&self, stage: Stage) -> &RetryPolicy {
        match stage {
            Stage::Llm => &self.settings.llm_retry,
            _ => &self.settings.ocr_retry,
        }
    }
}

fn plan(stage: Stage, state: PipelineState) -> Plan {
    if stage.entry_states().contains(&state) || state == stage.in_progress_state() {
        Plan::Run
    } else if state == stage.done_state() && !state.is_terminal() {
        Plan::Forward
    } else {
        Plan::Discard(format!("{} item does not apply to a {} document", stage, state))
    }
}

/// Stage a live document is waiting on
fn pending_stage(state: PipelineState) -> Option<Stage> {
    use PipelineState::*;

    match state {
        Queued | OcrInProgress | OcrFailed => Some(Stage::Ocr),
        OcrDone | LlmInProgress | LlmFailed => Some(Stage::Llm),
        LlmDone | Persisted => Some(Stage::Persist),
        Complete | Failed => None,
    }
}

/// Accept an http(s) URL with a host or an existing local file
async fn validate_source(source_ref: &str) -> Result<String, PipelineError> {
    let source_ref = source_ref.trim();
    if source_ref.is_empty() {
        return Err(PipelineError::Validation("source reference is empty".to_string()));
    }

    let lower = source_ref.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        let url = reqwest::Url::parse(source_ref)
            .map_err(|e| PipelineError::Validation(format!("{}: {}", source_ref, e)))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(PipelineError::Validation(format!("{}: URL has no host", source_ref)));
        }
        return Ok(source_ref.to_string());
    }

    if source_ref.contains("://") {
        return Err(PipelineError::Validation(format!(
            "{}: only http and https URLs are supported",
            source_ref
        )));
    }

    match tokio::fs::metadata(Path::new(source_ref)).await {
        Ok(meta) if meta.is_file() => Ok(source_ref.to_string()),
        Ok(_) => Err(PipelineError::Validation(format!("{}: not a file", source_ref))),
        Err(_) => Err(PipelineError::Validation(format!("{}: file does not exist", source_ref))),
    }
}
