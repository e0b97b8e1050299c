//! OCR Service
//!
//! Wraps the configured backend and enforces the hard per-call deadline.

use std::sync::Arc;
use std::time::Duration;

use super::{
    mineru::{MineruBackend, MineruSettings},
    provider::{OcrBackend, OcrServiceBackend},
    types::{OcrBackendKind, OcrError, OcrOutput},
};
use crate::config::OcrConfig;

/// OCR service used by the pipeline's OCR stage
#[derive(Clone)]
pub struct OcrService {
    backend: Arc<dyn OcrBackend>,
    timeout: Duration,
}

impl OcrService {
    pub fn new(backend: Arc<dyn OcrBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Build the backend selected in configuration
    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| OcrError::NotConfigured(format!("HTTP client: {}", e)))?;

        let backend: Arc<dyn OcrBackend> = match config.backend {
            OcrBackendKind::Mineru => {
                if config.api_key.is_empty() {
                    tracing::warn!("MINERU_API_KEY not set, OCR stage will fail every document");
                }
                Arc::new(MineruBackend::new(
                    client,
                    MineruSettings {
                        base_url: config.base_url.clone(),
                        api_key: config.api_key.clone(),
                        poll_interval: config.poll_interval,
                        language: config.language.clone(),
                        enable_formula: true,
                        results_dir: config.results_dir.clone(),
                        max_pages: config.max_pages,
                    },
                ))
            }
            OcrBackendKind::Service => Arc::new(OcrServiceBackend::new(client, &config.service_url)),
        };

        Ok(Self::new(backend, config.timeout))
    }

    pub fn kind(&self) -> OcrBackendKind {
        self.backend.kind()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }

    /// Extract with the configured deadline
    pub async fn extract(&self, source_ref: &str) -> Result<OcrOutput, OcrError> {
        self.invoke(source_ref, self.timeout).await
    }

    /// Extract, giving up after `timeout`
    pub async fn invoke(&self, source_ref: &str, timeout: Duration) -> Result<OcrOutput, OcrError> {
        match tokio::time::timeout(timeout, self.backend.extract(source_ref)).await {
            Ok(result) => result,
            Err(_) => Err(OcrError::Timeout(timeout)),
        }
    }
}
