//! Document store
//!
//! Durable document records. Every state change goes through
//! [`DocumentStore::update_state`], a compare-and-swap on the current state, so
//! two workers holding duplicate deliveries can never both apply a stage result.
//! Entering a stage goes through [`DocumentStore::claim`], which also leases the
//! stage to one worker so a duplicate delivery cannot run it a second time.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::document::{
    AnalysisRecord, Document, DocumentId, PipelineState, Stage, StatePatch, Transition,
};
use crate::error::StoreError;

/// Persistence contract used by the orchestrator and the API
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new `queued` document
    async fn create(&self, source_ref: &str) -> Result<Document, StoreError>;

    /// Fetch a document snapshot
    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError>;

    /// Move `id` from `expected` to `new`, applying `patch` atomically.
    ///
    /// Fails with [`StoreError::Conflict`] when the stored state is no longer
    /// `expected`, and with [`StoreError::InvalidTransition`] when the edge is
    /// not part of the state machine.
    async fn update_state(
        &self,
        id: DocumentId,
        expected: PipelineState,
        new: PipelineState,
        patch: StatePatch,
    ) -> Result<Document, StoreError>;

    /// Move `id` from `expected` into the stage state `in_progress` and hold it
    /// for `lease`.
    ///
    /// `expected == in_progress` re-claims a stage whose worker went away; it
    /// only succeeds once the previous lease has run out; a live lease fails
    /// with [`StoreError::Claimed`]. Any later `update_state` releases the lease.
    async fn claim(
        &self,
        id: DocumentId,
        expected: PipelineState,
        in_progress: PipelineState,
        lease: Duration,
    ) -> Result<Document, StoreError>;

    /// Administrative cancel: mark a live document `failed`
    async fn cancel(&self, id: DocumentId, reason: &str) -> Result<Document, StoreError>;

    /// Transition history, oldest first
    async fn history(&self, id: DocumentId) -> Result<Vec<Transition>, StoreError>;

    /// Documents not yet in a terminal state, oldest first
    async fn list_unfinished(&self) -> Result<Vec<Document>, StoreError>;

    /// The persisted analysis of a document, once it reached `persisted`
    async fn analysis(&self, id: DocumentId) -> Result<Option<AnalysisRecord>, StoreError>;
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    source_ref: String,
    state: String,
    ocr_attempts: i64,
    llm_attempts: i64,
    extracted_text: Option<String>,
    analysis_result: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document, StoreError> {
        Ok(Document {
            id: parse_id(&self.id)?,
            source_ref: self.source_ref,
            state: self
                .state
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{}", e)))?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            ocr_attempts: self.ocr_attempts as u32,
            llm_attempts: self.llm_attempts as u32,
            extracted_text: self.extracted_text,
            analysis_result: self.analysis_result,
            last_error: self.last_error,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransitionRow {
    document_id: String,
    from_state: String,
    to_state: String,
    detail: Option<String>,
    at: String,
}

impl TransitionRow {
    fn into_transition(self) -> Result<Transition, StoreError> {
        let parse_state = |s: &str| {
            s.parse::<PipelineState>()
                .map_err(|e| StoreError::Corrupt(format!("{}", e)))
        };
        Ok(Transition {
            document_id: parse_id(&self.document_id)?,
            from_state: parse_state(&self.from_state)?,
            to_state: parse_state(&self.to_state)?,
            detail: self.detail,
            at: parse_time(&self.at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AnalysisRow {
    document_id: String,
    extracted_text: String,
    analysis: String,
    persisted_at: String,
}

fn parse_id(s: &str) -> Result<DocumentId, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad document id {}: {}", s, e)))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {}: {}", s, e)))
}

const DOCUMENT_COLUMNS: &str = "id, source_ref, state, ocr_attempts, llm_attempts, \
     extracted_text, analysis_result, last_error, created_at, updated_at";

// ============================================================================
// SQLite implementation
// ============================================================================

/// SQLite-backed document store
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(
        conn: &mut SqliteConnection,
        id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        let query = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let row = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        row.map(DocumentRow::into_document).transpose()
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create(&self, source_ref: &str) -> Result<Document, StoreError> {
        let document = Document::new(source_ref);

        sqlx::query(
            r#"
            INSERT INTO documents (id, source_ref, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(document.id.to_string())
        .bind(&document.source_ref)
        .bind(document.state.as_str())
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(document_id = %document.id, source_ref = %source_ref, "Created document");

        Ok(document)
    }

    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut *conn, id).await
    }

    async fn update_state(
        &self,
        id: DocumentId,
        expected: PipelineState,
        new: PipelineState,
        patch: StatePatch,
    ) -> Result<Document, StoreError> {
        if !expected.can_transition_to(new) {
            return Err(StoreError::InvalidTransition {
                from: expected,
                to: new,
            });
        }

        let now = Utc::now().to_rfc3339();
        let (ocr_inc, llm_inc) = match patch.count_attempt {
            Some(Stage::Ocr) => (1i64, 0i64),
            Some(Stage::Llm) => (0, 1),
            _ => (0, 0),
        };
        let set_error = patch.last_error.is_some();
        let error = patch.last_error.clone().flatten();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET state = ?,
                updated_at = ?,
                extracted_text = COALESCE(?, extracted_text),
                analysis_result = COALESCE(?, analysis_result),
                last_error = CASE WHEN ? THEN ? ELSE last_error END,
                ocr_attempts = ocr_attempts + ?,
                llm_attempts = llm_attempts + ?,
                claimed_until = NULL
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(new.as_str())
        .bind(&now)
        .bind(&patch.extracted_text)
        .bind(&patch.analysis_result)
        .bind(set_error)
        .bind(&error)
        .bind(ocr_inc)
        .bind(llm_inc)
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let current = Self::fetch(&mut *tx, id).await?;
            tx.rollback().await?;
            return Err(match current {
                None => StoreError::NotFound(id),
                Some(doc) => StoreError::Conflict {
                    id,
                    expected,
                    actual: doc.state,
                },
            });
        }

        sqlx::query(
            r#"
            INSERT INTO state_transitions (document_id, from_state, to_state, detail, at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(expected.as_str())
        .bind(new.as_str())
        .bind(&error)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if new == PipelineState::Persisted {
            // Redelivered persist items must not write a second result
            sqlx::query(
                r#"
                INSERT INTO analysis_results (document_id, extracted_text, analysis, persisted_at)
                SELECT id, COALESCE(extracted_text, ''), COALESCE(analysis_result, ''), ?
                FROM documents
                WHERE id = ?
                ON CONFLICT(document_id) DO NOTHING
                "#,
            )
            .bind(&now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        let document = Self::fetch(&mut *tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        tx.commit().await?;

        tracing::debug!(
            document_id = %id,
            from = %expected,
            to = %new,
            "State updated"
        );

        Ok(document)
    }

    async fn claim(
        &self,
        id: DocumentId,
        expected: PipelineState,
        in_progress: PipelineState,
        lease: Duration,
    ) -> Result<Document, StoreError> {
        if !expected.can_transition_to(in_progress) {
            return Err(StoreError::InvalidTransition {
                from: expected,
                to: in_progress,
            });
        }

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let lease_ms = lease.as_millis().min(i64::MAX as u128) as i64;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET state = ?,
                updated_at = ?,
                claimed_until = ?
            WHERE id = ? AND state = ?
              AND (claimed_until IS NULL OR claimed_until <= ?)
            "#,
        )
        .bind(in_progress.as_str())
        .bind(now.to_rfc3339())
        .bind(now_ms.saturating_add(lease_ms))
        .bind(id.to_string())
        .bind(expected.as_str())
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let current: Option<(String, Option<i64>)> =
                sqlx::query_as("SELECT state, claimed_until FROM documents WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            let Some((state, claimed_until)) = current else {
                return Err(StoreError::NotFound(id));
            };
            let state: PipelineState = state
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{}", e)))?;

            return Err(if state == expected {
                let remaining = claimed_until.unwrap_or(now_ms).saturating_sub(now_ms).max(0);
                StoreError::Claimed {
                    id,
                    state,
                    remaining: Duration::from_millis(remaining as u64),
                }
            } else {
                StoreError::Conflict {
                    id,
                    expected,
                    actual: state,
                }
            });
        }

        let detail = (expected == in_progress).then(|| "previous claim expired".to_string());
        sqlx::query(
            r#"
            INSERT INTO state_transitions (document_id, from_state, to_state, detail, at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(expected.as_str())
        .bind(in_progress.as_str())
        .bind(&detail)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let document = Self::fetch(&mut *tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        tx.commit().await?;

        tracing::debug!(
            document_id = %id,
            from = %expected,
            to = %in_progress,
            lease_ms,
            "Stage claimed"
        );

        Ok(document)
    }

    async fn cancel(&self, id: DocumentId, reason: &str) -> Result<Document, StoreError> {
        // The state can move between our read and the CAS; retry on conflict.
        loop {
            let current = self.get(id).await?.ok_or(StoreError::NotFound(id))?;
            if current.state.is_terminal() {
                return Err(StoreError::Terminal {
                    id,
                    state: current.state,
                });
            }

            let patch = StatePatch {
                last_error: Some(Some(format!("cancelled: {}", reason))),
                ..Default::default()
            };

            match self
                .update_state(id, current.state, PipelineState::Failed, patch)
                .await
            {
                Err(StoreError::Conflict { .. }) => continue,
                other => {
                    if other.is_ok() {
                        tracing::info!(document_id = %id, reason = %reason, "Document cancelled");
                    }
                    return other;
                }
            }
        }
    }

    async fn history(&self, id: DocumentId) -> Result<Vec<Transition>, StoreError> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            r#"
            SELECT document_id, from_state, to_state, detail, at
            FROM state_transitions
            WHERE document_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransitionRow::into_transition).collect()
    }

    async fn list_unfinished(&self) -> Result<Vec<Document>, StoreError> {
        let query = format!(
            "SELECT {} FROM documents WHERE state NOT IN ('complete', 'failed') ORDER BY created_at ASC",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, DocumentRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    async fn analysis(&self, id: DocumentId) -> Result<Option<AnalysisRecord>, StoreError> {
        let row = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT document_id, extracted_text, analysis, persisted_at
            FROM analysis_results
            WHERE document_id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(AnalysisRecord {
                document_id: parse_id(&r.document_id)?,
                extracted_text: r.extracted_text,
                analysis: r.analysis,
                persisted_at: parse_time(&r.persisted_at)?,
            })
        })
        .transpose()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    async fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::new(create_memory_pool().await)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store().await;
        let doc = store.create("/papers/attention.pdf").await.unwrap();

        let fetched = store.get(doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.source_ref, "/papers/attention.pdf");
        assert_eq!(fetched.state, PipelineState::Queued);
        assert_eq!(fetched.ocr_attempts, 0);
        assert!(fetched.extracted_text.is_none());

        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_state_applies_patch() {
        let store = store().await;
        let doc = store.create("/papers/a.pdf").await.unwrap();

        store
            .update_state(doc.id, PipelineState::Queued, PipelineState::OcrInProgress, StatePatch::default())
            .await
            .unwrap();
        let updated = store
            .update_state(
                doc.id,
                PipelineState::OcrInProgress,
                PipelineState::OcrDone,
                StatePatch::extracted("# Title".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(updated.state, PipelineState::OcrDone);
        assert_eq!(updated.extracted_text.as_deref(), Some("# Title"));
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_expectation() {
        let store = store().await;
        let doc = store.create("/papers/a.pdf").await.unwrap();

        store
            .update_state(doc.id, PipelineState::Queued, PipelineState::OcrInProgress, StatePatch::default())
            .await
            .unwrap();
        store
            .update_state(
                doc.id,
                PipelineState::OcrInProgress,
                PipelineState::OcrDone,
                StatePatch::extracted("first".to_string()),
            )
            .await
            .unwrap();

        // A duplicate worker applying the same stage result loses the race
        let err = store
            .update_state(
                doc.id,
                PipelineState::OcrInProgress,
                PipelineState::OcrDone,
                StatePatch::extracted("second".to_string()),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: PipelineState::OcrInProgress,
                actual: PipelineState::OcrDone,
                ..
            }
        ));
        let current = store.get(doc.id).await.unwrap().unwrap();
        assert_eq!(current.extracted_text.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_claim_holds_lease_until_expiry() {
        let store = store().await;
        let doc = store.create("/papers/a.pdf").await.unwrap();
        let lease = Duration::from_millis(150);

        let claimed = store
            .claim(doc.id, PipelineState::Queued, PipelineState::OcrInProgress, lease)
            .await
            .unwrap();
        assert_eq!(claimed.state, PipelineState::OcrInProgress);

        // A duplicate delivery cannot take over a live claim
        let err = store
            .claim(doc.id, PipelineState::OcrInProgress, PipelineState::OcrInProgress, lease)
            .await
            .unwrap_err();
        match err {
            StoreError::Claimed { state, remaining, .. } => {
                assert_eq!(state, PipelineState::OcrInProgress);
                assert!(remaining > Duration::ZERO && remaining <= lease);
            }
            other => panic!("expected Claimed, got {:?}", other),
        }

        // ...but can once the holder's lease ran out
        tokio::time::sleep(lease + Duration::from_millis(20)).await;
        store
            .claim(doc.id, PipelineState::OcrInProgress, PipelineState::OcrInProgress, lease)
            .await
            .unwrap();

        let history = store.history(doc.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].detail.as_deref(), Some("previous claim expired"));
    }

    #[tokio::test]
    async fn test_claim_conflicts_and_release() {
        let store = store().await;
        let doc = store.create("/papers/a.pdf").await.unwrap();
        let lease = Duration::from_secs(60);

        store
            .claim(doc.id, PipelineState::Queued, PipelineState::OcrInProgress, lease)
            .await
            .unwrap();
        let err = store
            .claim(doc.id, PipelineState::Queued, PipelineState::OcrInProgress, lease)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { actual: PipelineState::OcrInProgress, .. }));

        // Finishing the stage releases the lease
        store
            .update_state(
                doc.id,
                PipelineState::OcrInProgress,
                PipelineState::OcrFailed,
                StatePatch::failed_attempt(Stage::Ocr, "503"),
            )
            .await
            .unwrap();
        store
            .claim(doc.id, PipelineState::OcrFailed, PipelineState::OcrInProgress, lease)
            .await
            .unwrap();

        let err = store
            .claim(Uuid::new_v4(), PipelineState::Queued, PipelineState::OcrInProgress, lease)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let err = store
            .claim(doc.id, PipelineState::Queued, PipelineState::LlmInProgress, lease)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let store = store().await;
        let doc = store.create("/papers/a.pdf").await.unwrap();

        let err = store
            .update_state(doc.id, PipelineState::Queued, PipelineState::Complete, StatePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_document_is_not_found() {
        let store = store().await;
        let err = store
            .update_state(
                Uuid::new_v4(),
                PipelineState::Queued,
                PipelineState::OcrInProgress,
                StatePatch::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_attempt_counter_and_error() {
        let store = store().await;
        let doc = store.create("/papers/a.pdf").await.unwrap();

        store
            .update_state(doc.id, PipelineState::Queued, PipelineState::OcrInProgress, StatePatch::default())
            .await
            .unwrap();
        let failed = store
            .update_state(
                doc.id,
                PipelineState::OcrInProgress,
                PipelineState::OcrFailed,
                StatePatch::failed_attempt(Stage::Ocr, "503 from provider"),
            )
            .await
            .unwrap();
        assert_eq!(failed.ocr_attempts, 1);
        assert_eq!(failed.llm_attempts, 0);
        assert_eq!(failed.last_error.as_deref(), Some("503 from provider"));

        // Success clears the error but keeps the counter
        store
            .update_state(doc.id, PipelineState::OcrFailed, PipelineState::OcrInProgress, StatePatch::default())
            .await
            .unwrap();
        let done = store
            .update_state(
                doc.id,
                PipelineState::OcrInProgress,
                PipelineState::OcrDone,
                StatePatch::extracted("text".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(done.ocr_attempts, 1);
        assert!(done.last_error.is_none());
    }

    #[tokio::test]
    async fn test_history_and_persisted_result() {
        let store = store().await;
        let doc = store.create("/papers/a.pdf").await.unwrap();

        let steps = [
            (PipelineState::Queued, PipelineState::OcrInProgress, StatePatch::default()),
            (PipelineState::OcrInProgress, PipelineState::OcrDone, StatePatch::extracted("text".into())),
            (PipelineState::OcrDone, PipelineState::LlmInProgress, StatePatch::default()),
            (PipelineState::LlmInProgress, PipelineState::LlmDone, StatePatch::analysed("summary".into())),
            (PipelineState::LlmDone, PipelineState::Persisted, StatePatch::default()),
            (PipelineState::Persisted, PipelineState::Complete, StatePatch::default()),
        ];
        for (from, to, patch) in steps {
            store.update_state(doc.id, from, to, patch).await.unwrap();
        }

        let history = store.history(doc.id).await.unwrap();
        assert_eq!(history.len(), 6);
        assert_eq!(history[0].from_state, PipelineState::Queued);
        assert_eq!(history[5].to_state, PipelineState::Complete);

        let record = store.analysis(doc.id).await.unwrap().unwrap();
        assert_eq!(record.extracted_text, "text");
        assert_eq!(record.analysis, "summary");
    }

    #[tokio::test]
    async fn test_cancel() {
        let store = store().await;
        let doc = store.create("/papers/a.pdf").await.unwrap();

        let cancelled = store.cancel(doc.id, "operator request").await.unwrap();
        assert_eq!(cancelled.state, PipelineState::Failed);
        assert_eq!(cancelled.last_error.as_deref(), Some("cancelled: operator request"));

        let err = store.cancel(doc.id, "again").await.unwrap_err();
        assert!(matches!(err, StoreError::Terminal { state: PipelineState::Failed, .. }));

        let err = store.cancel(Uuid::new_v4(), "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_unfinished() {
        let store = store().await;
        let live = store.create("/papers/live.pdf").await.unwrap();
        let dead = store.create("/papers/dead.pdf").await.unwrap();
        store.cancel(dead.id, "test").await.unwrap();

        let unfinished = store.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, live.id);
    }
}
