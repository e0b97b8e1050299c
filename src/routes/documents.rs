//! Document submission and status endpoints
//!
//! - `POST /documents` registers a paper and queues it for processing
//! - `GET /documents/:id` returns the current snapshot
//! - `GET /documents/:id/history` lists recorded state changes
//! - `POST /documents/:id/cancel` stops a document that is still in flight

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentId, PipelineState, Transition};
use super::extract::{ApiJson, ApiPath};
use crate::error::Result;
use crate::state::AppState;

/// Submission request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub source_ref: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: DocumentId,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// Document snapshot returned to clients
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: DocumentId,
    pub state: PipelineState,
    pub source_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ocr_attempts: u32,
    pub llm_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            state: doc.state,
            source_ref: doc.source_ref,
            result: doc.analysis_result,
            extracted_text: doc.extracted_text,
            error: doc.last_error,
            ocr_attempts: doc.ocr_attempts,
            llm_attempts: doc.llm_attempts,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_document))
        .route("/:id", get(get_document))
        .route("/:id/history", get(get_history))
        .route("/:id/cancel", post(cancel_document))
}

async fn submit_document(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    let id = state.orchestrator().enqueue(&request.source_ref).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { id })))
}

async fn get_document(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<DocumentId>,
) -> Result<Json<DocumentResponse>> {
    let document = state.orchestrator().get_status(id).await?;
    Ok(Json(document.into()))
}

async fn get_history(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<DocumentId>,
) -> Result<Json<Vec<Transition>>> {
    let history = state.orchestrator().history(id).await?;
    Ok(Json(history))
}

async fn cancel_document(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<DocumentId>,
    request: Option<Json<CancelRequest>>,
) -> Result<Json<DocumentResponse>> {
    let reason = request
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "cancelled by operator".to_string());

    let document = state.orchestrator().cancel(id, &reason).await?;
    Ok(Json(document.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, DocumentStore, SqliteDocumentStore};
    use crate::llm::LlmBackendKind;
    use crate::ocr::OcrBackendKind;
    use crate::pipeline::{Orchestrator, OrchestratorSettings, StageHandler, StageResult};
    use crate::queue::InMemoryQueue;
    use async_trait::async_trait;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl StageHandler for Echo {
        async fn run(&self, document: &Document) -> StageResult {
            StageResult::Success(format!("processed {}", document.source_ref))
        }
    }

    async fn server() -> (TestServer, Arc<Orchestrator>) {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(create_memory_pool().await));
        let orchestrator = Arc::new(Orchestrator::new(
            store,
            Arc::new(InMemoryQueue::new()),
            Arc::new(Echo),
            Arc::new(Echo),
            OrchestratorSettings::default(),
        ));
        let state = AppState::new(orchestrator.clone(), OcrBackendKind::Mineru, LlmBackendKind::OpenAI);
        let server = TestServer::new(crate::routes::app(state)).unwrap();
        (server, orchestrator)
    }

    #[tokio::test]
    async fn test_submit_and_fetch() {
        let (server, orchestrator) = server().await;

        let response = server
            .post("/documents")
            .json(&json!({ "sourceRef": "https://arxiv.org/pdf/1706.03762" }))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        let id = response.json::<Value>()["id"].as_str().unwrap().to_string();

        let snapshot: Value = server.get(&format!("/documents/{}", id)).await.json();
        assert_eq!(snapshot["state"], "queued");
        assert_eq!(snapshot["sourceRef"], "https://arxiv.org/pdf/1706.03762");
        assert_eq!(snapshot["ocrAttempts"], 0);
        assert!(snapshot.get("result").is_none());

        while !matches!(orchestrator.process_next().await.unwrap(), crate::pipeline::Outcome::Idle) {}

        let snapshot: Value = server.get(&format!("/documents/{}", id)).await.json();
        assert_eq!(snapshot["state"], "complete");
        assert_eq!(snapshot["result"], "processed https://arxiv.org/pdf/1706.03762");

        let history: Value = server.get(&format!("/documents/{}/history", id)).await.json();
        assert_eq!(history.as_array().unwrap().len(), 6);
        assert_eq!(history[0]["fromState"], "queued");
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_source() {
        let (server, _) = server().await;

        let response = server
            .post("/documents")
            .json(&json!({ "sourceRef": "  " }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_submit_without_source_ref_is_json_error() {
        let (server, _) = server().await;

        let response = server.post("/documents").json(&json!({ "wrong": 1 })).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "validation_error");
        assert!(body["message"].as_str().unwrap().contains("sourceRef"));

        let response = server
            .post("/documents")
            .text("{not json")
            .content_type("application/json")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_malformed_id_is_json_error() {
        let (server, _) = server().await;

        for path in [
            "/documents/not-a-uuid",
            "/documents/not-a-uuid/history",
        ] {
            let response = server.get(path).await;
            response.assert_status(StatusCode::BAD_REQUEST);
            let body: Value = response.json();
            assert_eq!(body["error"], "validation_error");
            assert!(body["message"].is_string());
        }

        server
            .post("/documents/not-a-uuid/cancel")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_document_is_404() {
        let (server, _) = server().await;
        let id = uuid::Uuid::new_v4();

        let response = server.get(&format!("/documents/{}", id)).await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["error"], "not_found");

        server
            .get(&format!("/documents/{}/history", id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .post(&format!("/documents/{}/cancel", id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel() {
        let (server, _) = server().await;

        let response = server
            .post("/documents")
            .json(&json!({ "sourceRef": "https://arxiv.org/pdf/1706.03762" }))
            .await;
        let id = response.json::<Value>()["id"].as_str().unwrap().to_string();

        let response = server
            .post(&format!("/documents/{}/cancel", id))
            .json(&json!({ "reason": "wrong paper" }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["state"], "failed");
        assert_eq!(body["error"], "cancelled: wrong paper");

        server
            .post(&format!("/documents/{}/cancel", id))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_health() {
        let (server, _) = server().await;

        for path in ["/api/health", "/health"] {
            let body: Value = server.get(path).await.json();
            assert_eq!(body["status"], "healthy");
            assert_eq!(body["ocr_backend"], "mineru");
            assert_eq!(body["llm_backend"], "openai");
        }
    }
}
