//! LLM Service
//!
//! Builds the analysis prompt, calls the configured backend and enforces the
//! hard per-call deadline.

use std::sync::Arc;
use std::time::Duration;

use super::prompts::{build_analysis_prompt, ANALYSIS_SYSTEM_PROMPT};
use super::provider::{LlmBackend, OllamaBackend, OpenAiBackend};
use super::types::{LlmBackendKind, LlmError, LlmOutput};
use crate::config::LlmConfig;

/// LLM service used by the pipeline's analysis stage
#[derive(Clone)]
pub struct LlmService {
    backend: Arc<dyn LlmBackend>,
    timeout: Duration,
    max_input_chars: usize,
}

impl LlmService {
    pub fn new(backend: Arc<dyn LlmBackend>, timeout: Duration, max_input_chars: usize) -> Self {
        Self {
            backend,
            timeout,
            max_input_chars,
        }
    }

    /// Build the backend selected in configuration
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::NotConfigured(format!("HTTP client: {}", e)))?;

        let backend: Arc<dyn LlmBackend> = match config.backend {
            LlmBackendKind::OpenAI => Arc::new(OpenAiBackend::new(
                client,
                &config.base_url,
                &config.api_key,
                &config.model,
            )),
            LlmBackendKind::Ollama => {
                Arc::new(OllamaBackend::new(client, &config.base_url, &config.model))
            }
        };

        Ok(Self::new(backend, config.timeout, config.max_input_chars))
    }

    pub fn kind(&self) -> LlmBackendKind {
        self.backend.kind()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Analyse extracted paper text with the configured deadline
    pub async fn analyse(&self, extracted_text: &str) -> Result<LlmOutput, LlmError> {
        self.invoke(extracted_text, self.timeout).await
    }

    /// Analyse, giving up after `timeout`
    pub async fn invoke(&self, extracted_text: &str, timeout: Duration) -> Result<LlmOutput, LlmError> {
        if extracted_text.trim().is_empty() {
            return Err(LlmError::NoInput);
        }

        let prompt = build_analysis_prompt(extracted_text, self.max_input_chars);

        match tokio::time::timeout(timeout, self.backend.complete(ANALYSIS_SYSTEM_PROMPT, &prompt)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(timeout)),
        }
    }
}
