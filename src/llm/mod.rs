//! LLM Module
//!
//! Analyses extracted paper text through a remote language model.
//!
//! Backends (one chosen at startup):
//! - OpenAI-compatible `/chat/completions` (OpenAI, DeepSeek, vLLM, ...)
//! - Ollama `/api/generate`

mod prompts;
mod provider;
mod service;
mod types;

pub use prompts::{build_analysis_prompt, ANALYSIS_SYSTEM_PROMPT};
pub use provider::{LlmBackend, OllamaBackend, OpenAiBackend};
pub use service::LlmService;
pub use types::{LlmBackendKind, LlmError, LlmOutput};
