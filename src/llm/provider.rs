//! LLM Providers
//!
//! Defines the backend trait and implementations for the supported APIs.

use async_trait::async_trait;
use serde::Deserialize;

use super::types::{LlmBackendKind, LlmError, LlmOutput};
use crate::remote::truncate_body;

/// LLM backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend type
    fn kind(&self) -> LlmBackendKind;

    /// Model identifier sent to the provider
    fn model(&self) -> &str;

    /// Run one completion. Must be safe to repeat with the same input.
    async fn complete(&self, system: &str, prompt: &str) -> Result<LlmOutput, LlmError>;
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(LlmError::Http {
        status,
        body: truncate_body(&body),
    })
}

fn non_empty(content: Option<String>) -> Result<String, LlmError> {
    match content.map(|c| c.trim().to_string()) {
        Some(c) if !c.is_empty() => Ok(c),
        _ => Err(LlmError::EmptyResponse),
    }
}

// ============================================================================
// OpenAI-compatible
// ============================================================================

/// OpenAI-compatible chat completions provider
pub struct OpenAiBackend {
    client: reqwest::Client,
    /// API base, e.g. `https://api.openai.com/v1`
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn kind(&self) -> LlmBackendKind {
        LlmBackendKind::OpenAI
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<LlmOutput, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::NotConfigured("LLM_API_KEY not set".to_string()));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let request = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.2
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(LlmError::transport)?;
        let response = error_for_status(response).await?;

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let content = result.choices.into_iter().next().and_then(|c| c.message.content);

        Ok(LlmOutput {
            content: non_empty(content)?,
            model: self.model.clone(),
        })
    }
}

// ============================================================================
// Ollama
// ============================================================================

/// Ollama provider
pub struct OllamaBackend {
    client: reqwest::Client,
    /// Ollama API URL
    base_url: String,
    /// Model name (e.g., "qwen2.5", "llama3.1")
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

impl OllamaBackend {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn kind(&self) -> LlmBackendKind {
        LlmBackendKind::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<LlmOutput, LlmError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = serde_json::json!({
            "model": self.model,
            "system": system,
            "prompt": prompt,
            "stream": false
        });

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(LlmError::transport)?;
        let response = error_for_status(response).await?;

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        Ok(LlmOutput {
            content: non_empty(result.response)?,
            model: self.model.clone(),
        })
    }
}
