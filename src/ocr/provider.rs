//! OCR Providers
//!
//! Defines the backend trait and the OCR microservice implementation.
//! The MinerU backend lives in `mineru.rs`.

use async_trait::async_trait;
use serde::Deserialize;

use super::types::{OcrBackendKind, OcrError, OcrOutput};
use crate::remote::{truncate_body, Disposition};

/// OCR backend trait
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Get the backend type
    fn kind(&self) -> OcrBackendKind;

    /// Check if the backend is reachable
    async fn is_available(&self) -> bool;

    /// Extract markdown from a document (local path or URL).
    ///
    /// Must be safe to call repeatedly for the same source.
    async fn extract(&self, source_ref: &str) -> Result<OcrOutput, OcrError>;
}

/// HomeSystem OCR microservice provider
pub struct OcrServiceBackend {
    client: reqwest::Client,
    /// Microservice base URL
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    success: bool,
    #[serde(default)]
    ocr_result: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
}

impl OcrServiceBackend {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl OcrBackend for OcrServiceBackend {
    fn kind(&self) -> OcrBackendKind {
        OcrBackendKind::Service
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/health", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn extract(&self, source_ref: &str) -> Result<OcrOutput, OcrError> {
        let url = format!("{}/api/ocr/process", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "source_ref": source_ref }))
            .send()
            .await
            .map_err(OcrError::transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Http {
                status,
                body: truncate_body(&body),
            });
        }

        let result: ProcessResponse = response
            .json()
            .await
            .map_err(|e| OcrError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        if !result.success {
            return Err(OcrError::Provider {
                message: result
                    .error
                    .unwrap_or_else(|| "OCR service reported failure".to_string()),
                disposition: Disposition::Retryable,
            });
        }

        let markdown = result
            .ocr_result
            .ok_or_else(|| OcrError::InvalidResponse("missing ocr_result".to_string()))?;

        Ok(OcrOutput::new(markdown, OcrBackendKind::Service, result.task_id))
    }
}

/// Mock backend for testing
#[cfg(test)]
pub struct MockBackend {
    pub response: std::sync::Mutex<Vec<Result<OcrOutput, OcrError>>>,
    pub available: bool,
}

#[cfg(test)]
#[async_trait]
impl OcrBackend for MockBackend {
    fn kind(&self) -> OcrBackendKind {
        OcrBackendKind::Service
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn extract(&self, _source_ref: &str) -> Result<OcrOutput, OcrError> {
        self.response
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(OcrError::TaskFailed("mock exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_server;
    use axum::{http::StatusCode, routing::post, Json, Router};

    #[tokio::test]
    async fn test_service_backend_success() {
        let router = Router::new().route(
            "/api/ocr/process",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["source_ref"], "/papers/a.pdf");
                Json(serde_json::json!({
                    "success": true,
                    "ocr_result": "# Extracted",
                    "task_id": "abc"
                }))
            }),
        );
        let base = spawn_server(router).await;

        let backend = OcrServiceBackend::new(reqwest::Client::new(), &base);
        let output = backend.extract("/papers/a.pdf").await.unwrap();
        assert_eq!(output.markdown, "# Extracted");
        assert_eq!(output.task_id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_service_backend_reported_failure_is_retryable() {
        let router = Router::new().route(
            "/api/ocr/process",
            post(|| async {
                Json(serde_json::json!({ "success": false, "error": "MinerU task failed or timed out" }))
            }),
        );
        let base = spawn_server(router).await;

        let backend = OcrServiceBackend::new(reqwest::Client::new(), &base);
        let err = backend.extract("/papers/a.pdf").await.unwrap_err();
        assert_eq!(err.disposition(), Disposition::Retryable);
    }

    #[tokio::test]
    async fn test_service_backend_bad_request_is_fatal() {
        let router = Router::new().route(
            "/api/ocr/process",
            post(|| async { (StatusCode::BAD_REQUEST, "not a pdf") }),
        );
        let base = spawn_server(router).await;

        let backend = OcrServiceBackend::new(reqwest::Client::new(), &base);
        let err = backend.extract("/papers/a.pdf").await.unwrap_err();
        assert!(matches!(err, OcrError::Http { .. }));
        assert_eq!(err.disposition(), Disposition::Fatal);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_retryable() {
        // Nothing listens on port 9 of localhost
        let backend = OcrServiceBackend::new(reqwest::Client::new(), "http://127.0.0.1:9");
        assert!(!backend.is_available().await);
        let err = backend.extract("/papers/a.pdf").await.unwrap_err();
        assert_eq!(err.disposition(), Disposition::Retryable);
    }
}
