//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::StoreError;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    // Databases created before stage claims carried a lease
    let lease_columns: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('documents') WHERE name = 'claimed_until'",
    )
    .fetch_one(pool)
    .await?;
    if lease_columns == 0 {
        sqlx::query("ALTER TABLE documents ADD COLUMN claimed_until INTEGER")
            .execute(pool)
            .await?;
    }

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Documents submitted for analysis
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    source_ref TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    ocr_attempts INTEGER NOT NULL DEFAULT 0,
    llm_attempts INTEGER NOT NULL DEFAULT 0,
    extracted_text TEXT,
    analysis_result TEXT,
    last_error TEXT,
    -- Epoch millis until which an in-progress stage belongs to its worker
    claimed_until INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_state ON documents(state);
CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at);

-- Every state change, in order
CREATE TABLE IF NOT EXISTS state_transitions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL,
    from_state TEXT NOT NULL,
    to_state TEXT NOT NULL,
    detail TEXT,
    at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transitions_document ON state_transitions(document_id);

-- Final analysis, written exactly once per document
CREATE TABLE IF NOT EXISTS analysis_results (
    document_id TEXT PRIMARY KEY,
    extracted_text TEXT NOT NULL,
    analysis TEXT NOT NULL,
    persisted_at TEXT NOT NULL
);

-- Durable work queue (used when QUEUE_URL points at SQLite)
CREATE TABLE IF NOT EXISTS work_items (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    visible_at INTEGER NOT NULL,
    receipt TEXT,
    deliveries INTEGER NOT NULL DEFAULT 0,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_work_items_visible ON work_items(visible_at);
"#;
