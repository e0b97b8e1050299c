//! LLM Types

use std::time::Duration;

use crate::remote::{classify_status, classify_transport, Disposition};

/// LLM backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackendKind {
    /// OpenAI-compatible chat completions API
    OpenAI,
    /// Ollama generate API
    Ollama,
}

impl Default for LlmBackendKind {
    fn default() -> Self {
        Self::OpenAI
    }
}

impl LlmBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Ollama => "ollama",
        }
    }
}

/// Analysis produced by a model
#[derive(Debug, Clone)]
pub struct LlmOutput {
    pub content: String,
    pub model: String,
}

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM backend not configured: {0}")]
    NotConfigured(String),

    #[error("LLM provider returned {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("LLM request failed: {message}")]
    Transport {
        message: String,
        disposition: Disposition,
    },

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    #[error("LLM returned an empty analysis")]
    EmptyResponse,

    #[error("No extracted text to analyse")]
    NoInput,

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),
}

impl LlmError {
    /// Whether the orchestrator should try this document again
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::NotConfigured(_) | Self::NoInput => Disposition::Fatal,
            Self::Http { status, .. } => classify_status(*status),
            Self::Transport { disposition, .. } => *disposition,
            Self::InvalidResponse(_) | Self::EmptyResponse | Self::Timeout(_) => {
                Disposition::Retryable
            }
        }
    }

    pub(crate) fn transport(err: reqwest::Error) -> Self {
        Self::Transport {
            disposition: classify_transport(&err),
            message: err.to_string(),
        }
    }
}
