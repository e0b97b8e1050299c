//! OCR Types
//!
//! Defines types for remote OCR extraction of paper PDFs.

use std::path::PathBuf;
use std::time::Duration;

use crate::remote::{classify_status, Disposition};

/// OCR backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrBackendKind {
    /// MinerU cloud extraction API
    Mineru,
    /// HomeSystem OCR microservice
    Service,
}

impl Default for OcrBackendKind {
    fn default() -> Self {
        Self::Mineru
    }
}

impl OcrBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mineru => "mineru",
            Self::Service => "service",
        }
    }
}

/// OCR result
#[derive(Debug, Clone)]
pub struct OcrOutput {
    /// Extracted markdown
    pub markdown: String,
    /// Backend used
    pub backend: OcrBackendKind,
    /// Provider-side task id (if any)
    pub task_id: Option<String>,
    /// Page count and saved artifacts, when the backend reports them
    pub report: OcrReport,
}

impl OcrOutput {
    pub fn new(markdown: String, backend: OcrBackendKind, task_id: Option<String>) -> Self {
        Self {
            markdown,
            backend,
            task_id,
            report: OcrReport::default(),
        }
    }

    pub fn char_count(&self) -> usize {
        self.markdown.chars().count()
    }
}

/// What a backend learned about the document besides its text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrReport {
    /// Pages in the source, as counted by the provider
    pub total_pages: Option<u32>,
    /// `total_pages` exceeds the configured page limit
    pub is_oversized: bool,
    pub images_count: usize,
    /// Markdown and image files written to the results directory
    pub saved_files: Vec<PathBuf>,
}

/// OCR error types
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR backend not configured: {0}")]
    NotConfigured(String),

    #[error("Source document unavailable: {0}")]
    SourceUnavailable(String),

    #[error("OCR provider returned {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("OCR request failed: {message}")]
    Transport {
        message: String,
        disposition: Disposition,
    },

    #[error("OCR provider error: {message}")]
    Provider {
        message: String,
        disposition: Disposition,
    },

    #[error("OCR task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid OCR response: {0}")]
    InvalidResponse(String),

    #[error("OCR call timed out after {0:?}")]
    Timeout(Duration),
}

impl OcrError {
    /// Whether the orchestrator should try this document again
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::NotConfigured(_) | Self::SourceUnavailable(_) | Self::TaskFailed(_) => {
                Disposition::Fatal
            }
            Self::Http { status, .. } => classify_status(*status),
            Self::Transport { disposition, .. } | Self::Provider { disposition, .. } => {
                *disposition
            }
            Self::InvalidResponse(_) | Self::Timeout(_) => Disposition::Retryable,
        }
    }

    pub(crate) fn transport(err: reqwest::Error) -> Self {
        Self::Transport {
            disposition: crate::remote::classify_transport(&err),
            message: err.to_string(),
        }
    }
}
