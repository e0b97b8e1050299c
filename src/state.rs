//! Application state management

use std::sync::Arc;

use crate::llm::LlmBackendKind;
use crate::ocr::OcrBackendKind;
use crate::pipeline::Orchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    orchestrator: Arc<Orchestrator>,
    ocr_backend: OcrBackendKind,
    llm_backend: LlmBackendKind,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        ocr_backend: OcrBackendKind,
        llm_backend: LlmBackendKind,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                orchestrator,
                ocr_backend,
                llm_backend,
            }),
        }
    }

    /// Get the pipeline orchestrator
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner.orchestrator
    }

    pub fn ocr_backend(&self) -> OcrBackendKind {
        self.inner.ocr_backend
    }

    pub fn llm_backend(&self) -> LlmBackendKind {
        self.inner.llm_backend
    }
}
