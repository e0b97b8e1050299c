//! Stage handlers
//!
//! Each handler turns a document into a [`StageResult`]; the orchestrator owns
//! every state change.

use async_trait::async_trait;

use crate::document::Document;
use crate::llm::LlmService;
use crate::ocr::OcrService;
use crate::remote::Disposition;

/// Result of running one stage once
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// Stage payload: extracted markdown or analysis text
    Success(String),
    Retryable(String),
    Fatal(String),
}

impl StageResult {
    fn from_error(disposition: Disposition, message: String) -> Self {
        match disposition {
            Disposition::Retryable => Self::Retryable(message),
            Disposition::Fatal => Self::Fatal(message),
        }
    }
}

/// A unit of stage work. Implementations must be safe to repeat.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn run(&self, document: &Document) -> StageResult;
}

/// Text extraction through the configured OCR backend
pub struct OcrStage {
    service: OcrService,
}

impl OcrStage {
    pub fn new(service: OcrService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl StageHandler for OcrStage {
    async fn run(&self, document: &Document) -> StageResult {
        match self.service.extract(&document.source_ref).await {
            Ok(output) => {
                tracing::debug!(
                    document_id = %document.id,
                    backend = output.backend.as_str(),
                    task_id = ?output.task_id,
                    chars = output.char_count(),
                    pages = ?output.report.total_pages,
                    oversized = output.report.is_oversized,
                    images = output.report.images_count,
                    saved_files = output.report.saved_files.len(),
                    "OCR finished"
                );
                StageResult::Success(output.markdown)
            }
            Err(e) => StageResult::from_error(e.disposition(), e.to_string()),
        }
    }
}

/// Paper analysis through the configured LLM backend
pub struct LlmStage {
    service: LlmService,
}

impl LlmStage {
    pub fn new(service: LlmService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl StageHandler for LlmStage {
    async fn run(&self, document: &Document) -> StageResult {
        let Some(text) = document.extracted_text.as_deref() else {
            return StageResult::Fatal("Document has no extracted text".to_string());
        };

        match self.service.analyse(text).await {
            Ok(output) => {
                tracing::debug!(
                    document_id = %document.id,
                    model = %output.model,
                    chars = output.content.len(),
                    "Analysis finished"
                );
                StageResult::Success(output.content)
            }
            Err(e) => StageResult::from_error(e.disposition(), e.to_string()),
        }
    }
}
